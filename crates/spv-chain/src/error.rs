//! Error types for the chain engine and checkpoint loading.

use spv_core::VerificationError;
use spv_primitives::{CodecError, Hash256};
use spv_store::StoreError;
use thiserror::Error;

/// Errors from ingesting headers and blocks.
#[derive(Error, Debug)]
pub enum ChainError {
    /// A consensus rule was broken.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// The block store refused.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Raw bytes failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An ancestor needed for a difficulty transition or reorg walk is
    /// not in the store.
    #[error("ancestor {hash} missing from the block store")]
    MissingAncestor { hash: Hash256 },
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors from reading a checkpoint stream.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The stream does not start with the textual magic line.
    #[error("unexpected checkpoint magic: {0:?}")]
    BadMagic(String),

    /// A count line is unparseable or out of range.
    #[error("bad checkpoint count: {0}")]
    BadCount(String),

    /// A checkpoint line decodes to a record of impossible length.
    #[error("unexpected length of checkpoint record: {0}")]
    BadRecordSize(usize),

    /// A line is not valid base64.
    #[error("malformed checkpoint line: {0}")]
    Malformed(String),

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A decoded record failed to parse.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Seeding the block store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
