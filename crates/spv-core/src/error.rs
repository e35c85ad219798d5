//! Error types for consensus verification.

use spv_primitives::{CodecError, CompactTarget, Hash256};
use thiserror::Error;

/// A single broken consensus rule.
///
/// Every check in header and block-body verification maps to exactly one
/// variant, so callers can react to the rule rather than parse messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The header hash does not meet its claimed difficulty target.
    #[error("hash is higher than target: {hash} vs {target}")]
    PowBelowTarget { hash: Hash256, target: CompactTarget },

    /// The header timestamp is further in the future than the allowed drift.
    #[error("block timestamp too far ahead: {time} vs allowed {allowed}")]
    TimestampTooFarAhead { time: u32, allowed: u32 },

    /// The transactions do not hash to the header's Merkle root.
    #[error("merkle root mismatch: computed {computed} vs header {header}")]
    MerkleMismatch { computed: Hash256, header: Hash256 },

    /// The coinbase witness commitment does not match the witness root.
    #[error("witness commitment mismatch: computed {computed} vs committed {committed}")]
    WitnessCommitmentMismatch { computed: Hash256, committed: Hash256 },

    /// The coinbase witness reserved value is missing or malformed.
    #[error("coinbase witness reserved value invalid: {0}")]
    BadWitnessReserved(String),

    /// A transaction has witness data but the block commits to none.
    #[error("transaction witness found but no witness commitment present")]
    UnexpectedWitness,

    /// A coinbase transaction at the wrong position, or a non-coinbase first.
    #[error("transaction {index} breaks the coinbase position rule")]
    BadCoinbasePosition { index: usize },

    /// The coinbase script does not start with the expected encoded height.
    #[error("coinbase script does not carry expected height {expected}")]
    BadCoinbaseHeight { expected: u32 },

    /// Too many signature operations across the block.
    #[error("block has too many signature operations: {count} > {max}")]
    SigOpsExceeded { count: usize, max: usize },

    /// Serialized block exceeds the size limit.
    #[error("block larger than {max} bytes: {size}")]
    OversizedBlock { size: usize, max: usize },

    /// The block carries no transactions (or only a header).
    #[error("block had no transactions")]
    EmptyBlock,

    /// A transaction breaks a structural rule.
    #[error("bad transaction: {0}")]
    BadTransaction(String),

    /// The header's difficulty target is not the one the chain requires.
    #[error("difficulty target mismatch: got {got}, expected {expected}")]
    BadDifficulty { got: CompactTarget, expected: CompactTarget },

    /// The underlying bytes could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result type for verification.
pub type VerifyResult<T> = Result<T, VerificationError>;
