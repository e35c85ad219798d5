//! Error types for the byte codec.

use thiserror::Error;

/// Errors produced while reading or writing wire-format data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before a complete value could be read.
    #[error("truncated input: needed {needed} more bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// The bytes were structurally invalid.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// A variable-length integer was not in its shortest encoding.
    #[error("non-canonical varint encoding of {0}")]
    NonCanonicalVarInt(u64),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
