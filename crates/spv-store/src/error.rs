//! Error types for the storage layer.

use spv_primitives::CodecError;
use thiserror::Error;

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store was closed and can serve nothing.
    #[error("block store is closed")]
    Closed,

    /// A required entry is missing.
    #[error("not found in block store: {0}")]
    NotFound(String),

    /// The underlying file refused.
    #[error("block store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk state is not what a well-formed store looks like.
    #[error("block store corrupt: {0}")]
    Corrupt(String),

    /// Every slot the record hashes to is occupied by a live entry.
    #[error("block store full")]
    StoreFull,

    /// A record failed to encode or decode.
    #[error("block store serialization error: {0}")]
    Serialization(#[from] CodecError),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
