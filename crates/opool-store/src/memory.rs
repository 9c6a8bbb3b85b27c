use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};
use crate::overlay::PendingWrites;
use crate::traits::RecordStore;

/// In-memory, BTreeMap-based record store.
///
/// Intended for tests and embedding. Committed data lives for as long as the
/// store value does, so handing the store from one pool to the next (see
/// `ObjectPool::close`) behaves like reopening a persistent store.
#[derive(Default)]
pub struct InMemoryRecordStore {
    data: BTreeMap<String, String>,
    pending: Option<PendingWrites>,
    open: bool,
}

impl InMemoryRecordStore {
    /// Create a new, empty, not yet opened store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with committed entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            data: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            pending: None,
            open: false,
        }
    }

    /// Number of committed entries (ignores any active transaction).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::NotOpen)
        }
    }
}

impl RecordStore for InMemoryRecordStore {
    fn open(&mut self) -> StoreResult<()> {
        self.open = true;
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
        pending.apply(&mut self.data);
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
        self.data.clear();
        Ok(())
    }

    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        self.ensure_open()?;
        Ok(match &self.pending {
            Some(pending) => pending
                .keys(&self.data)
                .into_iter()
                .filter_map(|k| {
                    let v = pending.get(&self.data, &k)?.to_string();
                    Some((k, v))
                })
                .collect(),
            None => self
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("record_count", &self.data.len())
            .field("open", &self.open)
            .field("in_transaction", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> InMemoryRecordStore {
        let mut store = InMemoryRecordStore::new();
        store.open().unwrap();
        store
    }

    // -----------------------------------------------------------------------
    // Open state
    // -----------------------------------------------------------------------

    #[test]
    fn operations_require_open() {
        let mut store = InMemoryRecordStore::new();
        assert!(!store.is_open());
        assert!(matches!(store.get("a"), Err(StoreError::NotOpen)));
        assert!(matches!(store.begin_transaction(), Err(StoreError::NotOpen)));
        store.open().unwrap();
        assert!(store.is_open());
        assert!(store.get("a").unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn writes_outside_transaction_fail() {
        let mut store = open_store();
        let err = store.put("a", "1").unwrap_err();
        assert!(matches!(err, StoreError::NoTransaction(ref k) if k == "a"));
        assert!(matches!(
            store.remove_key("a"),
            Err(StoreError::NoTransaction(_))
        ));
    }

    #[test]
    fn commit_applies_writes() {
        let mut store = open_store();
        store.begin_transaction().unwrap();
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        // Visible inside the transaction, not yet committed.
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.len(), 0);

        store.commit_transaction().unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.count().unwrap(), 2);
        assert!(!store.in_transaction());
    }

    #[test]
    fn rollback_discards_writes() {
        let mut store = open_store();
        store.begin_transaction().unwrap();
        store.put("a", "1").unwrap();
        store.rollback_transaction().unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn transactions_do_not_nest() {
        let mut store = open_store();
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(StoreError::TransactionActive)
        ));
    }

    #[test]
    fn commit_without_transaction_fails() {
        let mut store = open_store();
        assert!(matches!(
            store.commit_transaction(),
            Err(StoreError::NoActiveTransaction)
        ));
        assert!(matches!(
            store.rollback_transaction(),
            Err(StoreError::NoActiveTransaction)
        ));
    }

    #[test]
    fn remove_inside_transaction() {
        let mut store = InMemoryRecordStore::with_entries([("a", "1"), ("b", "2")]);
        store.open().unwrap();
        store.begin_transaction().unwrap();
        assert!(store.remove_key("a").unwrap());
        assert!(!store.remove_key("zz").unwrap());
        assert!(!store.has_key("a").unwrap());
        assert_eq!(store.keys().unwrap(), vec!["b"]);
        store.commit_transaction().unwrap();
        assert_eq!(store.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    #[test]
    fn keys_and_entries_are_sorted() {
        let mut store = InMemoryRecordStore::with_entries([("c", "3"), ("a", "1")]);
        store.open().unwrap();
        store.begin_transaction().unwrap();
        store.put("b", "2").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["a", "b", "c"]);
        let entries = store.entries().unwrap();
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn clear_removes_all_and_drops_transaction() {
        let mut store = InMemoryRecordStore::with_entries([("a", "1")]);
        store.open().unwrap();
        store.begin_transaction().unwrap();
        store.put("b", "2").unwrap();
        store.clear().unwrap();
        assert!(!store.in_transaction());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn debug_format() {
        let store = InMemoryRecordStore::with_entries([("a", "1")]);
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryRecordStore"));
        assert!(debug.contains("record_count: 1"));
    }
}
