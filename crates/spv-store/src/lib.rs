//! # spv-store
//!
//! Block stores: a persistent mapping from block hash to stored block,
//! plus a single chain-head pointer.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`]: a bounded insertion-ordered map. Tests and
//!   short-history SPV clients.
//! - [`SpvFileStore`]: a fixed-size ring of compact records over a
//!   single file, sized at creation, with a crash-atomic chain-head
//!   update.
//!
//! Both are safe for concurrent readers with a single writer, and both
//! reject every operation after [`BlockStore::close`].

mod error;
mod file;
mod memory;

pub use error::{StoreError, StoreResult};
pub use file::{SpvFileStore, DEFAULT_FILE_CAPACITY, SPV_FILE_MAGIC};
pub use memory::{MemoryStore, DEFAULT_MEMORY_CAPACITY};

use spv_core::StoredBlock;
use spv_primitives::Hash256;

/// The contract every block store honors.
///
/// A store owns exactly one chain-head pointer at all times once
/// initialized; the chain engine is the only writer.
pub trait BlockStore: Send + Sync {
    /// Insert or overwrite a stored block, keyed by its header hash.
    fn put(&self, block: StoredBlock) -> StoreResult<()>;

    /// Look up a stored block by header hash.
    fn get(&self, hash: &Hash256) -> StoreResult<Option<StoredBlock>>;

    /// The tip of the currently-selected best chain.
    fn chain_head(&self) -> StoreResult<StoredBlock>;

    /// Atomically repoint the chain head. The block must already have
    /// been `put`.
    fn set_chain_head(&self, block: StoredBlock) -> StoreResult<()>;

    /// Release resources. Every later operation fails with
    /// [`StoreError::Closed`].
    fn close(&self) -> StoreResult<()>;
}
