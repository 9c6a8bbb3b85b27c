//! Error types for pool operations.
//!
//! Fatal conditions (validation errors and invariant violations) are
//! variants of [`PoolError`]. Recoverable conditions such as an unknown type
//! name or a missing record are not errors: they are logged with
//! `tracing::warn!` and the affected lookup yields `None`.

use thiserror::Error;

use opool_types::{Puuid, TypeError};
use opool_store::StoreError;

/// Errors that can occur during object pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A root object is required but none has been stored.
    #[error("pool has no root object")]
    MissingRoot,

    /// The root pointer is already set to a different puuid.
    #[error("root is already {existing}; refusing to change it to {requested}")]
    RootAlreadySet { existing: Puuid, requested: Puuid },

    /// A value that is not an instance was offered for admission.
    #[error("{type_name} value {pid} is not an instance and cannot be stored")]
    NotAnInstance { pid: Puuid, type_name: String },

    /// An object that refuses storage was required to be stored (e.g. as root).
    #[error("{type_name} object {pid} is not storable")]
    NotStorable { pid: Puuid, type_name: String },

    /// The same puuid was written twice inside one commit.
    #[error("object {0} stored twice in one commit (store-time mutation loop)")]
    DoubleStore(Puuid),

    /// An internal pool invariant does not hold.
    #[error("pool invariant violated: {0}")]
    InvariantViolation(String),

    /// The object is borrowed elsewhere and cannot be inspected or updated.
    #[error("object is busy (already borrowed) during {0}")]
    Busy(&'static str),

    /// The pool has been closed.
    #[error("pool is closed")]
    Closed,

    /// Record encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid pool configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
