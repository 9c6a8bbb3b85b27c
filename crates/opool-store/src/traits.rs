use crate::error::StoreResult;

/// Ordered, transactional string-to-string map backing an object pool.
///
/// All implementations must satisfy these invariants:
/// - Keys iterate in ascending order.
/// - `put` and `remove_key` fail with [`StoreError::NoTransaction`] unless a
///   transaction is active.
/// - Reads made while a transaction is active see its pending writes.
/// - Nothing written inside a transaction is visible to a later reopen of the
///   backing data until `commit_transaction` returns `Ok`.
/// - All I/O errors are propagated, never silently ignored.
///
/// [`StoreError::NoTransaction`]: crate::StoreError::NoTransaction
pub trait RecordStore: Send {
    /// Open the store, loading any previously committed data.
    ///
    /// Opening an already open store is a no-op.
    fn open(&mut self) -> StoreResult<()>;

    /// Returns `true` once `open` has succeeded.
    fn is_open(&self) -> bool;

    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write `value` under `key` inside the active transaction.
    fn put(&mut self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete `key` inside the active transaction. Returns `true` if the key
    /// existed.
    fn remove_key(&mut self, key: &str) -> StoreResult<bool>;

    /// All keys, in ascending order.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Start a transaction. Transactions do not nest.
    fn begin_transaction(&mut self) -> StoreResult<()>;

    /// Apply every pending write of the active transaction.
    fn commit_transaction(&mut self) -> StoreResult<()>;

    /// Discard every pending write of the active transaction.
    fn rollback_transaction(&mut self) -> StoreResult<()>;

    /// Returns `true` while a transaction is active.
    fn in_transaction(&self) -> bool;

    /// Remove every key, discarding any active transaction.
    fn clear(&mut self) -> StoreResult<()>;

    /// Check whether `key` exists.
    fn has_key(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of keys in the store.
    fn count(&self) -> StoreResult<usize> {
        Ok(self.keys()?.len())
    }

    /// All key/value pairs, in ascending key order.
    ///
    /// Default implementation calls `get()` for each key. Backends may
    /// override to avoid the per-key lookup.
    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let mut entries = Vec::new();
        for key in self.keys()? {
            if let Some(value) = self.get(&key)? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }
}
