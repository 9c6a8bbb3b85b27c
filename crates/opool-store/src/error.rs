/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has not been opened yet.
    #[error("record store is not open")]
    NotOpen,

    /// A write was attempted outside of a transaction.
    #[error("write to {0:?} outside of a transaction")]
    NoTransaction(String),

    /// `begin_transaction` was called while a transaction is already active.
    #[error("a transaction is already active")]
    TransactionActive,

    /// `commit_transaction` or `rollback_transaction` without a transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The committed data could not be moved into place.
    #[error("failed to persist {path}: {reason}")]
    Persist { path: String, reason: String },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
