use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid puuid {0:?}: {1}")]
    InvalidPuuid(String, &'static str),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
