//! The chain engine: ingest headers, enforce difficulty transitions,
//! track the heaviest chain, reorganize when a fork overtakes it.

use crate::error::{ChainError, ChainResult};
use crate::event::{ChainEvent, ChainEventSink};
use crate::orphans::OrphanPool;
use parking_lot::Mutex;
use spv_core::{
    Block, Header, NetworkParams, ScriptVerifier, StoredBlock, ValidationPolicy,
    VerificationError, VerifyFlags,
};
use spv_primitives::{CompactTarget, Hash256};
use spv_store::BlockStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default bound on buffered parentless headers.
pub const DEFAULT_ORPHAN_CAPACITY: usize = 256;

/// What became of one ingested header.
#[derive(Clone, Debug)]
pub enum Accepted {
    /// Extended the best chain by one.
    Extended(StoredBlock),
    /// Won a reorganization; this block is the new best tip.
    Reorganized(StoredBlock),
    /// Stored on a side chain; the best chain is unchanged.
    SideChain(StoredBlock),
    /// Parent unknown; buffered. The caller may want to fetch the
    /// returned ancestor hash.
    Orphan(Hash256),
    /// Already in the store; nothing happened.
    Duplicate(StoredBlock),
}

/// Accepts headers and blocks into a store, linearizing all ingestion
/// behind one lock.
///
/// Construction wires together the network parameters, the store
/// (usually seeded from a checkpoint) and the event sink. The policy
/// defaults to full consensus rules against the system clock.
pub struct ChainEngine {
    params: NetworkParams,
    policy: ValidationPolicy,
    store: Arc<dyn BlockStore>,
    sink: Arc<dyn ChainEventSink>,
    /// Outer-layer transaction validation, consulted when full blocks
    /// arrive. Headers never need it.
    script_verifier: Option<Arc<dyn ScriptVerifier>>,
    orphans: Mutex<OrphanPool>,
    /// Serializes whole-header ingestion, giving acceptances a total
    /// order and keeping sink callbacks consistent with the store.
    ingest_lock: Mutex<()>,
}

impl ChainEngine {
    /// Build an engine over `store`, publishing into `sink`.
    pub fn new(
        params: NetworkParams,
        store: Arc<dyn BlockStore>,
        sink: Arc<dyn ChainEventSink>,
    ) -> Self {
        ChainEngine {
            params,
            policy: ValidationPolicy::strict(),
            store,
            sink,
            script_verifier: None,
            orphans: Mutex::new(OrphanPool::new(DEFAULT_ORPHAN_CAPACITY)),
            ingest_lock: Mutex::new(()),
        }
    }

    /// Replace the validation policy.
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach an outer-layer transaction verifier for full blocks.
    pub fn with_script_verifier(mut self, verifier: Arc<dyn ScriptVerifier>) -> Self {
        self.script_verifier = Some(verifier);
        self
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// The current best tip.
    pub fn chain_head(&self) -> ChainResult<StoredBlock> {
        Ok(self.store.chain_head()?)
    }

    /// Number of headers waiting for a parent.
    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().len()
    }

    /// Parse and ingest one 80-byte header.
    pub fn accept_header_bytes(&self, bytes: &[u8]) -> ChainResult<Accepted> {
        let header = Header::parse(bytes)?;
        self.accept_header(header)
    }

    /// Ingest one header.
    pub fn accept_header(&self, header: Header) -> ChainResult<Accepted> {
        let _guard = self.ingest_lock.lock();
        self.accept_locked(header, None)
    }

    /// Parse and ingest a block; header-only payloads behave exactly
    /// like [`Self::accept_header_bytes`].
    pub fn accept_block_bytes(&self, bytes: &[u8]) -> ChainResult<Accepted> {
        let block = Block::parse(bytes)?;
        self.accept_block(block)
    }

    /// Ingest a block. If a body is present it is verified against the
    /// header before anything is stored.
    pub fn accept_block(&self, block: Block) -> ChainResult<Accepted> {
        let _guard = self.ingest_lock.lock();
        if block.is_header_only() {
            return self.accept_locked(block.as_header(), None);
        }
        self.accept_locked(block.as_header(), Some(&block))
    }

    fn accept_locked(&self, header: Header, body: Option<&Block>) -> ChainResult<Accepted> {
        let hash = header.hash();
        if let Some(existing) = self.store.get(&hash)? {
            debug!(block = %hash, "duplicate header ignored");
            return Ok(Accepted::Duplicate(existing));
        }

        let prev = match self.store.get(&header.prev_hash())? {
            Some(prev) => prev,
            None => {
                let prev_hash = header.prev_hash();
                debug!(block = %hash, parent = %prev_hash, "parent unknown, buffering orphan");
                self.orphans.lock().insert(header);
                return Ok(Accepted::Orphan(prev_hash));
            }
        };

        // Nothing below mutates the store until every check has passed.
        header.verify(&self.policy)?;
        self.check_difficulty_transition(&prev, &header)?;
        if let Some(block) = body {
            let flags = VerifyFlags {
                height_in_coinbase: header.is_bip34(),
            };
            let height = prev.height() + 1;
            block.verify_transactions(Some(height), flags)?;
            if let Some(verifier) = &self.script_verifier {
                for tx in block.transactions().unwrap_or_default() {
                    verifier.verify_transaction(tx, height)?;
                }
            }
        }

        let stored = prev.build_next(header)?;
        self.store.put(stored.clone())?;

        let head = self.store.chain_head()?;
        let result = if stored.more_work_than(&head) {
            if stored.header().prev_hash() == head.hash() {
                self.store.set_chain_head(stored.clone())?;
                info!(height = stored.height(), block = %stored.hash(), "new best block");
                self.sink.push(ChainEvent::NewBestBlock(stored.clone()));
                Accepted::Extended(stored)
            } else {
                self.reorganize(head, stored.clone())?;
                Accepted::Reorganized(stored)
            }
        } else {
            debug!(
                height = stored.height(),
                block = %stored.hash(),
                "block forks the chain below the best head"
            );
            Accepted::SideChain(stored)
        };

        self.flush_orphans(&hash);
        Ok(result)
    }

    /// Reconnect any buffered children of a block that just landed,
    /// depth first.
    fn flush_orphans(&self, parent: &Hash256) {
        let children = self.orphans.lock().take_children(parent);
        for child in children {
            let child_hash = child.hash();
            debug!(block = %child_hash, "reconsidering buffered orphan");
            if let Err(error) = self.accept_locked(child, None) {
                warn!(block = %child_hash, %error, "buffered orphan rejected");
            }
        }
    }

    /// Switch the best chain to `new_head`, emitting one reorganize
    /// event with the blocks leaving and joining the best chain.
    fn reorganize(&self, old_head: StoredBlock, new_head: StoredBlock) -> ChainResult<()> {
        let split = self.find_split(&old_head, &new_head)?;
        let disconnected = self.walk_back(&old_head, &split)?;
        let mut connected = self.walk_back(&new_head, &split)?;
        connected.reverse();

        warn!(
            split_height = split.height(),
            old_head = %old_head.hash(),
            new_head = %new_head.hash(),
            disconnected = disconnected.len(),
            connected = connected.len(),
            "chain reorganization"
        );

        self.store.set_chain_head(new_head.clone())?;
        self.sink.push(ChainEvent::Reorganize {
            old_head,
            new_head,
            disconnected,
            connected,
        });
        Ok(())
    }

    /// The lowest common ancestor of two chain tips.
    fn find_split(&self, a: &StoredBlock, b: &StoredBlock) -> ChainResult<StoredBlock> {
        let mut a = a.clone();
        let mut b = b.clone();
        while a.hash() != b.hash() {
            if a.height() >= b.height() {
                a = self.parent_of(&a)?;
            } else {
                b = self.parent_of(&b)?;
            }
        }
        Ok(a)
    }

    /// Blocks from `tip` down to, but not including, `ancestor`;
    /// highest first.
    fn walk_back(
        &self,
        tip: &StoredBlock,
        ancestor: &StoredBlock,
    ) -> ChainResult<Vec<StoredBlock>> {
        let mut out = Vec::new();
        let mut cursor = tip.clone();
        while cursor.hash() != ancestor.hash() {
            out.push(cursor.clone());
            cursor = self.parent_of(&cursor)?;
        }
        Ok(out)
    }

    fn parent_of(&self, block: &StoredBlock) -> ChainResult<StoredBlock> {
        let prev_hash = block.header().prev_hash();
        self.store
            .get(&prev_hash)?
            .ok_or(ChainError::MissingAncestor { hash: prev_hash })
    }

    /// Enforce the difficulty schedule for the header following `prev`.
    ///
    /// Off retarget boundaries the target must repeat, except for the
    /// test-network rule that lets a block fall back to the easiest
    /// target when more than twice the spacing has passed. On a
    /// boundary the new target is recomputed from the closing window's
    /// timespan and compared *after* the compact round trip, since the
    /// encoding's precision loss is part of consensus.
    fn check_difficulty_transition(
        &self,
        prev: &StoredBlock,
        header: &Header,
    ) -> ChainResult<()> {
        let next_height = prev.height() + 1;
        let interval = self.params.retarget_interval();
        let prev_bits = prev.header().bits();

        if next_height % interval != 0 {
            if self.params.allow_min_difficulty_blocks()
                && header.time() > prev.header().time() + 2 * self.params.target_spacing_secs()
                && header.bits() == self.params.max_target()
            {
                return Ok(());
            }
            if header.bits() != prev_bits {
                return Err(VerificationError::BadDifficulty {
                    got: header.bits(),
                    expected: prev_bits,
                }
                .into());
            }
            return Ok(());
        }

        // Walk back to the first block of the closing window.
        let mut cursor = prev.clone();
        for _ in 0..interval - 1 {
            cursor = self.parent_of(&cursor)?;
        }

        let target_timespan = self.params.target_timespan_secs();
        let actual = prev
            .header()
            .time()
            .saturating_sub(cursor.header().time())
            .clamp(target_timespan / 4, target_timespan * 4);

        let mut new_target = prev_bits.to_target().map_err(VerificationError::from)?
            * actual / target_timespan;
        let max_target = self
            .params
            .max_target()
            .to_target()
            .map_err(VerificationError::from)?;
        if new_target > max_target {
            new_target = max_target;
        }
        let expected = CompactTarget::from_target(&new_target);
        if header.bits() != expected {
            return Err(VerificationError::BadDifficulty {
                got: header.bits(),
                expected,
            }
            .into());
        }
        debug!(
            height = next_height,
            timespan = actual,
            bits = %expected,
            "difficulty retarget"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::VecSink;
    use spv_primitives::{dsha256, ByteWriter};
    use spv_store::MemoryStore;

    fn engine_with(params: NetworkParams) -> (ChainEngine, Arc<VecSink>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_genesis(&params).unwrap());
        let sink = Arc::new(VecSink::new());
        let engine = ChainEngine::new(params, store.clone(), sink.clone())
            .with_policy(ValidationPolicy::relaxed());
        (engine, sink, store)
    }

    /// A child header of `parent` repeating its difficulty. The nonce
    /// varies the hash so sibling chains diverge.
    fn child(parent: &StoredBlock, nonce: u32) -> Header {
        Header::new(
            1,
            parent.hash(),
            Hash256::from_bytes([nonce as u8; 32]),
            parent.header().time() + 600,
            parent.header().bits(),
            nonce,
        )
    }

    #[test]
    fn simple_extension() {
        let (engine, sink, _store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();
        let header = child(&genesis, 1);
        let hash = header.hash();

        match engine.accept_header(header).unwrap() {
            Accepted::Extended(stored) => {
                assert_eq!(stored.height(), 1);
                assert_eq!(stored.hash(), hash);
            }
            other => panic!("expected extension, got {:?}", other),
        }
        assert_eq!(engine.chain_head().unwrap().height(), 1);
        assert!(matches!(
            sink.events().as_slice(),
            [ChainEvent::NewBestBlock(_)]
        ));
    }

    #[test]
    fn duplicates_are_reported_not_reprocessed() {
        let (engine, sink, _store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();
        let header = child(&genesis, 1);
        engine.accept_header(header.clone()).unwrap();
        assert!(matches!(
            engine.accept_header(header).unwrap(),
            Accepted::Duplicate(_)
        ));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn orphans_buffer_and_reconnect() {
        let (engine, _sink, _store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();
        let b1 = child(&genesis, 1);
        let b2 = Header::new(
            1,
            b1.hash(),
            Hash256::ZERO,
            b1.time() + 600,
            b1.bits(),
            2,
        );

        // The child arrives first and has nowhere to attach.
        match engine.accept_header(b2).unwrap() {
            Accepted::Orphan(waiting_for) => assert_eq!(waiting_for, b1.hash()),
            other => panic!("expected orphan, got {:?}", other),
        }
        assert_eq!(engine.orphan_count(), 1);
        assert_eq!(engine.chain_head().unwrap().height(), 0);

        // The parent arrives; the buffered child connects behind it.
        engine.accept_header(b1).unwrap();
        assert_eq!(engine.orphan_count(), 0);
        assert_eq!(engine.chain_head().unwrap().height(), 2);
    }

    #[test]
    fn heavier_fork_reorganizes_with_ordered_events() {
        let (engine, sink, _store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();

        // Chain A: two blocks above genesis.
        let a1 = child(&genesis, 0xa1);
        let a1_stored = match engine.accept_header(a1).unwrap() {
            Accepted::Extended(stored) => stored,
            other => panic!("{:?}", other),
        };
        let a2 = child(&a1_stored, 0xa2);
        let a2_stored = match engine.accept_header(a2).unwrap() {
            Accepted::Extended(stored) => stored,
            other => panic!("{:?}", other),
        };

        // Chain B: three blocks above genesis, strictly more work.
        let b1 = child(&genesis, 0xb1);
        assert!(matches!(
            engine.accept_header(b1.clone()).unwrap(),
            Accepted::SideChain(_)
        ));
        let b1_stored = engine.store.get(&b1.hash()).unwrap().unwrap();
        let b2 = child(&b1_stored, 0xb2);
        // Equal cumulative work to the head: first seen wins, stays a
        // side chain.
        assert!(matches!(
            engine.accept_header(b2.clone()).unwrap(),
            Accepted::SideChain(_)
        ));
        assert_eq!(engine.chain_head().unwrap().hash(), a2_stored.hash());

        let b2_stored = engine.store.get(&b2.hash()).unwrap().unwrap();
        let b3 = child(&b2_stored, 0xb3);
        let b3_stored = match engine.accept_header(b3).unwrap() {
            Accepted::Reorganized(stored) => stored,
            other => panic!("expected reorg, got {:?}", other),
        };
        assert_eq!(engine.chain_head().unwrap().hash(), b3_stored.hash());

        // One reorganize event: old side highest first, new side lowest
        // first.
        let events = sink.events();
        match events.last().unwrap() {
            ChainEvent::Reorganize {
                old_head,
                new_head,
                disconnected,
                connected,
            } => {
                assert_eq!(old_head.hash(), a2_stored.hash());
                assert_eq!(new_head.hash(), b3_stored.hash());
                let disconnected: Vec<u32> =
                    disconnected.iter().map(StoredBlock::height).collect();
                assert_eq!(disconnected, vec![2, 1]);
                assert_eq!(disconnected.len(), 2);
                let connected_heights: Vec<u32> =
                    connected.iter().map(StoredBlock::height).collect();
                assert_eq!(connected_heights, vec![1, 2, 3]);
                assert_eq!(connected[0].hash(), b1_stored.hash());
                assert_eq!(connected[2].hash(), b3_stored.hash());
            }
            other => panic!("expected reorganize event, got {:?}", other),
        }
    }

    #[test]
    fn same_headers_any_order_same_head() {
        let params = NetworkParams::regtest();
        let genesis = params.genesis_stored().unwrap();
        // Build two competing chains of headers up front.
        let mut headers = Vec::new();
        let mut cursor = genesis.clone();
        for nonce in [0x11, 0x12] {
            let header = child(&cursor, nonce);
            cursor = cursor.build_next(header.clone()).unwrap();
            headers.push(header);
        }
        let mut cursor = genesis;
        for nonce in [0x21, 0x22, 0x23] {
            let header = child(&cursor, nonce);
            cursor = cursor.build_next(header.clone()).unwrap();
            headers.push(header);
        }
        let winner = cursor.hash();

        // Deliver in several orders; the head always converges.
        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2, 3, 4],
            vec![4, 3, 2, 1, 0],
            vec![2, 0, 4, 1, 3],
            vec![3, 4, 2, 0, 1],
        ];
        for order in orders {
            let (engine, _sink, _store) = engine_with(NetworkParams::regtest());
            for index in order {
                engine.accept_header(headers[index].clone()).unwrap();
            }
            assert_eq!(engine.chain_head().unwrap().hash(), winner);
            assert_eq!(engine.chain_head().unwrap().height(), 3);
        }
    }

    #[test]
    fn bad_pow_is_rejected_and_not_stored() {
        let params = NetworkParams::regtest();
        let store = Arc::new(MemoryStore::with_genesis(&params).unwrap());
        let engine = ChainEngine::new(params, store.clone(), Arc::new(VecSink::new()));
        let genesis = engine.chain_head().unwrap();

        // Find a nonce whose hash misses even the easiest target.
        let mut header = child(&genesis, 0);
        let mut nonce = 0;
        while header.bits().is_met_by(&header.hash()).unwrap() {
            nonce += 1;
            header.set_nonce(nonce);
        }
        let hash = header.hash();
        match engine.accept_header(header).unwrap_err() {
            ChainError::Verification(VerificationError::PowBelowTarget { .. }) => {}
            other => panic!("expected pow failure, got {:?}", other),
        }
        assert!(store.get(&hash).unwrap().is_none());
        assert_eq!(engine.chain_head().unwrap().height(), 0);
    }

    #[test]
    fn solved_header_passes_strict_pow() {
        let params = NetworkParams::regtest();
        let store = Arc::new(MemoryStore::with_genesis(&params).unwrap());
        let engine = ChainEngine::new(params, store, Arc::new(VecSink::new()));
        let genesis = engine.chain_head().unwrap();

        // Grind until the easiest target is met; a coin flip per nonce.
        let mut header = child(&genesis, 0);
        let mut nonce = 0;
        while !header.bits().is_met_by(&header.hash()).unwrap() {
            nonce += 1;
            header.set_nonce(nonce);
        }
        assert!(matches!(
            engine.accept_header(header).unwrap(),
            Accepted::Extended(_)
        ));
    }

    #[test]
    fn wrong_bits_mid_window_rejected() {
        let (engine, _sink, store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();
        let mut header = child(&genesis, 1);
        header.set_bits(CompactTarget::new(0x1d00_ffff));
        let hash = header.hash();
        match engine.accept_header(header).unwrap_err() {
            ChainError::Verification(VerificationError::BadDifficulty { got, expected }) => {
                assert_eq!(got.compact(), 0x1d00_ffff);
                assert_eq!(expected.compact(), 0x207f_ffff);
            }
            other => panic!("expected difficulty mismatch, got {:?}", other),
        }
        assert!(store.get(&hash).unwrap().is_none());
    }

    #[test]
    fn testnet_twenty_minute_rule() {
        let params = NetworkParams::testnet();
        let store = Arc::new(MemoryStore::new());
        // Seed a mid-chain tip at a difficulty harder than the floor,
        // the shape a checkpoint bootstrap produces.
        let genesis = params.genesis_stored().unwrap();
        let tip_header = Header::new(
            1,
            genesis.hash(),
            Hash256::ZERO,
            genesis.header().time() + 600,
            CompactTarget::new(0x1c0f_ffff),
            7,
        );
        let tip = genesis.build_next(tip_header).unwrap();
        store.put(tip.clone()).unwrap();
        store.set_chain_head(tip.clone()).unwrap();
        let engine = ChainEngine::new(params.clone(), store, Arc::new(VecSink::new()))
            .with_policy(ValidationPolicy::relaxed());

        // A prompt block cannot fall back to the easiest target.
        let prompt = Header::new(
            1,
            tip.hash(),
            Hash256::ZERO,
            tip.header().time() + 300,
            params.max_target(),
            9,
        );
        match engine.accept_header(prompt).unwrap_err() {
            ChainError::Verification(VerificationError::BadDifficulty { expected, .. }) => {
                assert_eq!(expected.compact(), 0x1c0f_ffff);
            }
            other => panic!("expected difficulty mismatch, got {:?}", other),
        }

        // Twenty-one minutes of silence permit the easiest target.
        let lazy = Header::new(
            1,
            tip.hash(),
            Hash256::ZERO,
            tip.header().time() + 21 * 60,
            params.max_target(),
            8,
        );
        assert!(matches!(
            engine.accept_header(lazy).unwrap(),
            Accepted::Extended(_)
        ));
    }

    #[test]
    fn retarget_boundary_recomputes_bits() {
        let params = NetworkParams::regtest();
        let interval = params.retarget_interval();
        let (engine, _sink, _store) = engine_with(params.clone());

        // Blocks one second apart: the window closes far too fast and
        // the timespan clamps to a quarter of the target.
        let mut tip = engine.chain_head().unwrap();
        for height in 1..interval {
            let header = Header::new(
                1,
                tip.hash(),
                Hash256::ZERO,
                tip.header().time() + 1,
                tip.header().bits(),
                height,
            );
            engine.accept_header(header.clone()).unwrap();
            tip = tip.build_next(header).unwrap();
        }

        // The boundary block must carry a four-times-harder target.
        let old_target = params.max_target().to_target().unwrap();
        let expected = CompactTarget::from_target(&(old_target / 4u32));

        let wrong = Header::new(
            1,
            tip.hash(),
            Hash256::ZERO,
            tip.header().time() + 1,
            tip.header().bits(),
            interval,
        );
        match engine.accept_header(wrong).unwrap_err() {
            ChainError::Verification(VerificationError::BadDifficulty { expected: want, .. }) => {
                assert_eq!(want, expected);
            }
            other => panic!("expected difficulty mismatch, got {:?}", other),
        }

        let right = Header::new(
            1,
            tip.hash(),
            Hash256::ZERO,
            tip.header().time() + 1,
            expected,
            interval,
        );
        assert!(matches!(
            engine.accept_header(right).unwrap(),
            Accepted::Extended(_)
        ));
    }

    #[test]
    fn slow_window_caps_at_max_target() {
        let params = NetworkParams::regtest();
        let interval = params.retarget_interval();
        let (engine, _sink, _store) = engine_with(params.clone());

        // An hour between blocks: the timespan clamps high and the
        // recomputed target would overshoot the cap, so the easiest
        // target carries over unchanged.
        let mut tip = engine.chain_head().unwrap();
        for height in 1..=interval {
            let header = Header::new(
                1,
                tip.hash(),
                Hash256::ZERO,
                tip.header().time() + 3600,
                params.max_target(),
                height,
            );
            engine.accept_header(header.clone()).unwrap();
            tip = tip.build_next(header).unwrap();
        }
        assert_eq!(engine.chain_head().unwrap().height(), interval);
    }

    fn block_above(parent: &StoredBlock, nonce: u32) -> spv_core::Block {
        use spv_core::{merkle_root, Transaction, TxOut};
        let coinbase = Transaction::coinbase(
            vec![0x01, 0x00],
            vec![TxOut {
                value: 50_0000_0000,
                script_pub_key: vec![0x51],
            }],
        );
        let root = merkle_root(&[coinbase.txid()]);
        let header = Header::new(
            1,
            parent.hash(),
            root,
            parent.header().time() + 600,
            parent.header().bits(),
            nonce,
        );
        Block::new(header, Some(vec![coinbase]))
    }

    #[test]
    fn full_blocks_pass_body_checks_before_storage() {
        let (engine, _sink, store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();

        let block = block_above(&genesis, 1);
        assert!(matches!(
            engine.accept_block(block).unwrap(),
            Accepted::Extended(_)
        ));

        // A body that does not hash to the header's merkle root never
        // reaches the store.
        let template = block_above(&engine.chain_head().unwrap(), 2);
        let mut header = template.as_header();
        header.set_merkle_root(Hash256::from_bytes([0xcc; 32]));
        let bad = Block::new(header, template.transactions().map(|txs| txs.to_vec()));
        let hash = bad.hash();
        assert!(matches!(
            engine.accept_block(bad).unwrap_err(),
            ChainError::Verification(VerificationError::MerkleMismatch { .. })
        ));
        assert!(store.get(&hash).unwrap().is_none());
    }

    #[test]
    fn script_verifier_gates_full_blocks() {
        use spv_core::{ScriptVerifier, Transaction, VerifyResult};

        struct Rejector;
        impl ScriptVerifier for Rejector {
            fn verify_transaction(&self, tx: &Transaction, _height: u32) -> VerifyResult<()> {
                Err(VerificationError::BadTransaction(format!(
                    "{} refused",
                    tx.txid()
                )))
            }
        }

        let params = NetworkParams::regtest();
        let store = Arc::new(MemoryStore::with_genesis(&params).unwrap());
        let engine = ChainEngine::new(params, store.clone(), Arc::new(VecSink::new()))
            .with_policy(ValidationPolicy::relaxed())
            .with_script_verifier(Arc::new(Rejector));
        let genesis = engine.chain_head().unwrap();

        let block = block_above(&genesis, 1);
        let hash = block.hash();
        assert!(matches!(
            engine.accept_block(block).unwrap_err(),
            ChainError::Verification(VerificationError::BadTransaction(_))
        ));
        assert!(store.get(&hash).unwrap().is_none());

        // Headers sail past the verifier; it only sees bodies.
        let (engine2, _sink, _store) = engine_with(NetworkParams::regtest());
        let header = child(&genesis, 3);
        assert!(matches!(
            engine2.accept_header(header).unwrap(),
            Accepted::Extended(_)
        ));
    }

    #[test]
    fn accept_header_bytes_parses_the_wire_form() {
        let (engine, _sink, _store) = engine_with(NetworkParams::regtest());
        let genesis = engine.chain_head().unwrap();
        let header = child(&genesis, 1);
        let mut writer = ByteWriter::new();
        header.write(&mut writer);
        let bytes = writer.into_vec();
        assert_eq!(dsha256(&bytes), header.hash());
        assert!(matches!(
            engine.accept_header_bytes(&bytes).unwrap(),
            Accepted::Extended(_)
        ));
    }
}
