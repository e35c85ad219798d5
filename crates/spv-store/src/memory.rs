//! In-memory block store with insertion-order eviction.

use crate::{BlockStore, StoreError, StoreResult};
use parking_lot::RwLock;
use spv_core::{NetworkParams, StoredBlock};
use spv_primitives::Hash256;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of blocks kept before the oldest insertion is dropped.
pub const DEFAULT_MEMORY_CAPACITY: usize = 5000;

struct Inner {
    blocks: HashMap<Hash256, StoredBlock>,
    /// Insertion order, oldest first. Drives FIFO eviction.
    order: VecDeque<Hash256>,
    chain_head: Option<StoredBlock>,
    capacity: usize,
}

/// A bounded block store backed by a hash map.
///
/// When the map outgrows its capacity the oldest inserted entries are
/// evicted first, mirroring a linked hash map with a remove-eldest rule.
pub struct MemoryStore {
    inner: RwLock<Option<Inner>>,
}

impl MemoryStore {
    /// An empty store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// An empty store bounded at `capacity` blocks.
    pub fn with_capacity(capacity: usize) -> Self {
        MemoryStore {
            inner: RwLock::new(Some(Inner {
                blocks: HashMap::new(),
                order: VecDeque::new(),
                chain_head: None,
                capacity,
            })),
        }
    }

    /// A store seeded with the network's genesis block as chain head,
    /// the usual starting state for a fresh chain.
    pub fn with_genesis(params: &NetworkParams) -> StoreResult<Self> {
        let store = Self::new();
        let genesis = params.genesis_stored()?;
        store.put(genesis.clone())?;
        store.set_chain_head(genesis)?;
        Ok(store)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryStore {
    fn put(&self, block: StoredBlock) -> StoreResult<()> {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(StoreError::Closed)?;
        let hash = block.hash();
        if inner.blocks.insert(hash, block).is_none() {
            inner.order.push_back(hash);
        }
        while inner.blocks.len() > inner.capacity {
            if let Some(eldest) = inner.order.pop_front() {
                inner.blocks.remove(&eldest);
                debug!(evicted = %eldest, "memory store evicted eldest block");
            } else {
                break;
            }
        }
        Ok(())
    }

    fn get(&self, hash: &Hash256) -> StoreResult<Option<StoredBlock>> {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(inner.blocks.get(hash).cloned())
    }

    fn chain_head(&self) -> StoreResult<StoredBlock> {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or(StoreError::Closed)?;
        inner
            .chain_head
            .clone()
            .ok_or_else(|| StoreError::NotFound("chain head not set".into()))
    }

    fn set_chain_head(&self, block: StoredBlock) -> StoreResult<()> {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or(StoreError::Closed)?;
        inner.chain_head = Some(block);
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        *self.inner.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_core::Header;
    use spv_primitives::CompactTarget;

    fn params() -> NetworkParams {
        NetworkParams::regtest()
    }

    fn child_of(parent: &StoredBlock, nonce: u32) -> StoredBlock {
        let header = Header::new(
            1,
            parent.hash(),
            Hash256::ZERO,
            parent.header().time() + 600,
            CompactTarget::new(0x207f_ffff),
            nonce,
        );
        parent.build_next(header).unwrap()
    }

    #[test]
    fn put_then_get() {
        let store = MemoryStore::with_genesis(&params()).unwrap();
        let genesis = store.chain_head().unwrap();
        let block = child_of(&genesis, 1);
        store.put(block.clone()).unwrap();
        assert_eq!(store.get(&block.hash()).unwrap(), Some(block));
        assert_eq!(store.get(&Hash256::from_bytes([9; 32])).unwrap(), None);
    }

    #[test]
    fn chain_head_tracks_latest_setting() {
        let store = MemoryStore::with_genesis(&params()).unwrap();
        let genesis = store.chain_head().unwrap();
        assert_eq!(genesis.height(), 0);

        let tip = child_of(&genesis, 1);
        store.put(tip.clone()).unwrap();
        store.set_chain_head(tip.clone()).unwrap();
        assert_eq!(store.chain_head().unwrap(), tip);
    }

    #[test]
    fn missing_head_reported() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.chain_head(),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn eviction_is_insertion_ordered() {
        let store = MemoryStore::with_capacity(3);
        let genesis = params().genesis_stored().unwrap();
        store.put(genesis.clone()).unwrap();
        let a = child_of(&genesis, 1);
        let b = child_of(&genesis, 2);
        let c = child_of(&genesis, 3);
        store.put(a.clone()).unwrap();
        store.put(b.clone()).unwrap();
        // Genesis was inserted first; the fourth put evicts it.
        store.put(c.clone()).unwrap();
        assert_eq!(store.get(&genesis.hash()).unwrap(), None);
        assert!(store.get(&a.hash()).unwrap().is_some());
        assert!(store.get(&b.hash()).unwrap().is_some());
        assert!(store.get(&c.hash()).unwrap().is_some());
    }

    #[test]
    fn duplicate_put_does_not_evict() {
        let store = MemoryStore::with_capacity(2);
        let genesis = params().genesis_stored().unwrap();
        let a = child_of(&genesis, 1);
        store.put(genesis.clone()).unwrap();
        store.put(a.clone()).unwrap();
        // Re-putting an existing key must not push anything out.
        store.put(a.clone()).unwrap();
        assert!(store.get(&genesis.hash()).unwrap().is_some());
        assert!(store.get(&a.hash()).unwrap().is_some());
    }

    #[test]
    fn closed_store_rejects_everything() {
        let store = MemoryStore::with_genesis(&params()).unwrap();
        let head = store.chain_head().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(&head.hash()), Err(StoreError::Closed)));
        assert!(matches!(store.put(head.clone()), Err(StoreError::Closed)));
        assert!(matches!(store.chain_head(), Err(StoreError::Closed)));
        assert!(matches!(
            store.set_chain_head(head),
            Err(StoreError::Closed)
        ));
    }
}
