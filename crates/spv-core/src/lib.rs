//! # spv-core
//!
//! Consensus-critical data structures for the Bitcoin SPV node.
//!
//! This crate provides:
//! - Transaction parsing and serialization, segwit-aware, with txid/wtxid
//! - Block headers and blocks with cached hashes
//! - Merkle and witness-Merkle root construction
//! - Header and block-body verification rules
//! - Compactly-encoded stored blocks (header + cumulative work + height)
//! - Network parameters including the real genesis blocks
//!
//! ## Verification
//!
//! Verification never consults ambient state: a [`ValidationPolicy`]
//! carries the clock and any test relaxations into every verify call,
//! and each failed rule maps to one [`VerificationError`] variant.

mod block;
mod error;
mod merkle;
mod params;
pub mod script;
mod stored_block;
mod transaction;

pub use block::{
    Block, Header, VerifyFlags, ALLOWED_TIME_DRIFT_SECS, BLOCK_VERSION_BIP34,
    BLOCK_VERSION_BIP65, BLOCK_VERSION_BIP66, BLOCK_VERSION_GENESIS, HEADER_SIZE,
    MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE,
};
pub use error::{VerificationError, VerifyResult};
pub use merkle::merkle_root;
pub use params::{
    Clock, FixedClock, Network, NetworkParams, ScriptVerifier, SystemClock, ValidationPolicy,
};
pub use stored_block::{StoredBlock, COMPACT_SIZE_V1, COMPACT_SIZE_V2};
pub use transaction::{OutPoint, Transaction, TxIn, TxOut, Witness, MAX_MONEY};
