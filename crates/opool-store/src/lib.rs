//! Record storage for the object pool.
//!
//! The object pool persists its graph into an ordered, transactional
//! string-to-string map. This crate defines that contract and ships two
//! backends. The store never interprets values: records are opaque JSON
//! text, and the reserved `"root"` key is just another entry.
//!
//! # Storage Backends
//!
//! All backends implement the [`RecordStore`] trait:
//!
//! - [`InMemoryRecordStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`JsonFileRecordStore`] -- single JSON file, rewritten atomically on commit
//!
//! # Design Rules
//!
//! 1. Writes (`put`, `remove_key`) are only legal inside a transaction.
//! 2. Reads inside a transaction observe that transaction's pending writes.
//! 3. `commit_transaction` applies all pending writes at once;
//!    `rollback_transaction` discards them.
//! 4. Transactions do not nest.
//! 5. All I/O errors are propagated, never silently ignored or retried.

pub mod error;
pub mod file;
pub mod memory;
pub mod overlay;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::JsonFileRecordStore;
pub use memory::InMemoryRecordStore;
pub use overlay::PendingWrites;
pub use traits::RecordStore;
