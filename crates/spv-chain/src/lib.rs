//! # spv-chain
//!
//! The header-chain engine: accepts headers (and blocks) from untrusted
//! peers, verifies them, maintains the best chain by cumulative work in
//! a [`spv_store::BlockStore`], handles reorganizations, and notifies a
//! caller-supplied event sink.
//!
//! The companion [`CheckpointManager`] reads the signed textual
//! checkpoint format and seeds a fresh store so synchronization can
//! start near the present instead of at genesis.

mod checkpoints;
mod engine;
mod error;
mod event;
mod orphans;

pub use checkpoints::{CheckpointManager, TEXTUAL_MAGIC};
pub use engine::{Accepted, ChainEngine, DEFAULT_ORPHAN_CAPACITY};
pub use error::{ChainError, ChainResult, CheckpointError};
pub use event::{ChainEvent, ChainEventSink, NullSink, VecSink};
