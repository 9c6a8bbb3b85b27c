use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Configuration for an [`ObjectPool`](crate::ObjectPool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Scheduler target name; jobs of this pool coalesce under it.
    pub name: String,
    /// Debounce delay between the first mutation and the commit job.
    pub commit_delay_ms: u64,
    /// Run a collection pass inside `open()`, before the opened event fires.
    pub collect_on_open: bool,
    /// Drop swept objects from the active set instead of keeping them
    /// resident. When `false`, a swept object that is mutated later writes
    /// its record again.
    pub evict_collected: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            commit_delay_ms: 0,
            collect_on_open: true,
            evict_collected: false,
        }
    }
}

impl PoolConfig {
    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> PoolResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| PoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.name.trim().is_empty() {
            return Err(PoolError::Config("pool name must not be empty".into()));
        }
        Ok(())
    }

    pub fn commit_delay(&self) -> Duration {
        Duration::from_millis(self.commit_delay_ms)
    }

    /// A configuration with the given scheduler target name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
