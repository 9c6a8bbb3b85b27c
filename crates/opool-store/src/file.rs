use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::overlay::PendingWrites;
use crate::traits::RecordStore;

/// Record store persisted as a single JSON object on disk.
///
/// On-disk format: one JSON object mapping every key to its text value, keys
/// in ascending order. The whole file is rewritten on every commit through a
/// temporary file in the same directory followed by a rename, so a crash
/// leaves either the previous or the new committed state, never a mix.
pub struct JsonFileRecordStore {
    path: PathBuf,
    data: BTreeMap<String, String>,
    pending: Option<PendingWrites>,
    open: bool,
}

impl JsonFileRecordStore {
    /// Create a store backed by `path`. Nothing is read until `open`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: BTreeMap::new(),
            pending: None,
            open: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::NotOpen)
        }
    }

    fn load(path: &Path) -> StoreResult<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StoreResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let text =
            serde_json::to_string(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Persist {
            path: self.path.display().to_string(),
            reason: e.error.to_string(),
        })?;

        debug!(path = %self.path.display(), records = data.len(), "record file written");
        Ok(())
    }
}

impl RecordStore for JsonFileRecordStore {
    fn open(&mut self) -> StoreResult<()> {
        if self.open {
            return Ok(());
        }
        self.data = Self::load(&self.path)?;
        self.open = true;
        info!(path = %self.path.display(), records = self.data.len(), "record store opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        let value = match &self.pending {
            Some(pending) => pending.get(&self.data, key),
            None => self.data.get(key).map(String::as_str),
        };
        Ok(value.map(str::to_string))
    }

    fn put(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| StoreError::NoTransaction(key.to_string()))?;
        pending.put(key, value);
        Ok(())
    }

    fn remove_key(&mut self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| StoreError::NoTransaction(key.to_string()))?;
        Ok(pending.remove(&self.data, key))
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(match &self.pending {
            Some(pending) => pending.keys(&self.data),
            None => self.data.keys().cloned().collect(),
        })
    }

    fn begin_transaction(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        if self.pending.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.pending = Some(PendingWrites::new());
        Ok(())
    }

    fn commit_transaction(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        let pending = self.pending.take().ok_or(StoreError::NoActiveTransaction)?;
        if pending.is_empty() {
            return Ok(());
        }
        // Persist first; only adopt the new state once it is on disk.
        let mut next = self.data.clone();
        pending.apply(&mut next);
        self.persist(&next)?;
        self.data = next;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> StoreResult<()> {
        self.pending.take().ok_or(StoreError::NoActiveTransaction)?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.pending = None;
        let empty = BTreeMap::new();
        self.persist(&empty)?;
        self.data = empty;
        Ok(())
    }
}

impl std::fmt::Debug for JsonFileRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileRecordStore")
            .field("path", &self.path)
            .field("record_count", &self.data.len())
            .field("open", &self.open)
            .finish()
    }
}
