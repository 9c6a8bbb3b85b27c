use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;
use crate::record::ROOT_KEY;

/// Persistent identity of a storable object.
///
/// A `Puuid` is assigned once, when the object is created, and never changes
/// afterwards. It doubles as the object's key in the record store, so it can
/// never be empty and never collide with the reserved [`ROOT_KEY`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Puuid(String);

impl Puuid {
    /// Generate a fresh, time-ordered puuid.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Parse a puuid read back from the store or from user input.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() {
            return Err(TypeError::InvalidPuuid(s.to_string(), "empty"));
        }
        if s == ROOT_KEY {
            return Err(TypeError::InvalidPuuid(s.to_string(), "reserved key"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidPuuid(s.to_string(), "contains whitespace"));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (first 8 characters) for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for Puuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Puuid({})", self.short())
    }
}

impl fmt::Display for Puuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Puuid {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Puuid> for String {
    fn from(pid: Puuid) -> Self {
        pid.0
    }
}

impl AsRef<str> for Puuid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Puuid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_puuids_are_unique() {
        let a = Puuid::generate();
        let b = Puuid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_puuid_parses_back() {
        let pid = Puuid::generate();
        let parsed = Puuid::parse(pid.as_str()).unwrap();
        assert_eq!(pid, parsed);
    }

    #[test]
    fn parse_rejects_empty() {
        let err = Puuid::parse("").unwrap_err();
        assert!(matches!(err, TypeError::InvalidPuuid(_, "empty")));
    }

    #[test]
    fn parse_rejects_root_key() {
        let err = Puuid::parse(ROOT_KEY).unwrap_err();
        assert!(matches!(err, TypeError::InvalidPuuid(_, "reserved key")));
    }

    #[test]
    fn parse_rejects_whitespace() {
        assert!(Puuid::parse("ab cd").is_err());
    }

    #[test]
    fn short_is_at_most_8_chars() {
        assert_eq!(Puuid::parse("abc").unwrap().short(), "abc");
        assert_eq!(Puuid::generate().short().len(), 8);
    }

    #[test]
    fn serde_is_a_plain_string() {
        let pid = Puuid::parse("node-1").unwrap();
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, "\"node-1\"");
        let back: Puuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pid);
    }

    #[test]
    fn serde_rejects_reserved_key() {
        let result: Result<Puuid, _> = serde_json::from_str("\"root\"");
        assert!(result.is_err());
    }

    #[test]
    fn generated_puuids_sort_by_creation() {
        let first = Puuid::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Puuid::generate();
        assert!(first < second);
    }
}
