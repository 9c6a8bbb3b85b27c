//! Pending writes of an active transaction.
//!
//! Both backends keep their committed data in a `BTreeMap` and layer a
//! [`PendingWrites`] on top while a transaction is open. Reads go through the
//! overlay first; commit folds it into the base map in one step.

use std::collections::BTreeMap;

/// Write set of one transaction: `Some(value)` is a put, `None` a delete.
#[derive(Clone, Debug, Default)]
pub struct PendingWrites {
    writes: BTreeMap<String, Option<String>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys touched by this transaction.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Read `key` as seen from inside the transaction.
    pub fn get<'a>(&'a self, base: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
        match self.writes.get(key) {
            Some(pending) => pending.as_deref(),
            None => base.get(key).map(String::as_str),
        }
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.writes.insert(key.to_string(), Some(value.to_string()));
    }

    /// Record a delete. Returns `true` if the key was visible before.
    pub fn remove(&mut self, base: &BTreeMap<String, String>, key: &str) -> bool {
        let existed = self.get(base, key).is_some();
        self.writes.insert(key.to_string(), None);
        existed
    }

    /// Keys visible from inside the transaction, in ascending order.
    pub fn keys(&self, base: &BTreeMap<String, String>) -> Vec<String> {
        let mut keys: Vec<String> = base
            .keys()
            .filter(|k| !matches!(self.writes.get(k.as_str()), Some(None)))
            .cloned()
            .collect();
        for (key, value) in &self.writes {
            if value.is_some() && !base.contains_key(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        keys
    }

    /// Fold every pending write into `base`.
    pub fn apply(self, base: &mut BTreeMap<String, String>) {
        for (key, value) in self.writes {
            match value {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
    }
}
