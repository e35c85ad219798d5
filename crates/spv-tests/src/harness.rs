//! Test harness wiring an engine, a store, and an event sink.

use spv_chain::{ChainEngine, VecSink};
use spv_core::{NetworkParams, StoredBlock, ValidationPolicy};
use spv_store::{BlockStore, MemoryStore, SpvFileStore};
use std::path::Path;
use std::sync::Arc;

/// An engine over a store with a buffering sink, ready to ingest.
pub struct TestChain {
    pub engine: ChainEngine,
    pub store: Arc<dyn BlockStore>,
    pub sink: Arc<VecSink>,
    pub params: NetworkParams,
}

impl TestChain {
    /// Regtest chain over a genesis-seeded memory store, proof-of-work
    /// relaxed: the default fixture.
    pub fn regtest() -> Self {
        let params = NetworkParams::regtest();
        let store: Arc<dyn BlockStore> =
            Arc::new(MemoryStore::with_genesis(&params).expect("seeded store"));
        Self::over(params, store).relaxed()
    }

    /// Mainnet chain over a genesis-seeded memory store with full
    /// consensus rules; real vectors only.
    pub fn mainnet() -> Self {
        let params = NetworkParams::mainnet();
        let store: Arc<dyn BlockStore> =
            Arc::new(MemoryStore::with_genesis(&params).expect("seeded store"));
        Self::over(params, store)
    }

    /// Regtest chain over a file store at `path`, proof-of-work relaxed.
    pub fn regtest_on_disk(path: &Path) -> Self {
        let params = NetworkParams::regtest();
        let store: Arc<dyn BlockStore> =
            Arc::new(SpvFileStore::open(&params, path).expect("open file store"));
        Self::over(params, store).relaxed()
    }

    /// Wire an engine over an existing store.
    pub fn over(params: NetworkParams, store: Arc<dyn BlockStore>) -> Self {
        let sink = Arc::new(VecSink::new());
        let engine = ChainEngine::new(params.clone(), store.clone(), sink.clone());
        TestChain {
            engine,
            store,
            sink,
            params,
        }
    }

    /// Rebuild the engine with proof-of-work relaxed, for fabricated
    /// headers.
    pub fn relaxed(mut self) -> Self {
        self.engine = ChainEngine::new(
            self.params.clone(),
            self.store.clone(),
            self.sink.clone(),
        )
        .with_policy(ValidationPolicy::relaxed());
        self
    }

    /// The current best tip.
    pub fn head(&self) -> StoredBlock {
        self.engine.chain_head().expect("chain head")
    }
}
