//! Single-file persistent block store.
//!
//! Layout: a 40-byte file header (`"SPVB"`, format version, chain-head
//! hash) followed by a fixed number of 96-byte compact-v2 records. A
//! record's slot is its block hash modulo the capacity, with linear
//! probing over a short window; an all-zero record marks an empty slot.
//!
//! Writes land record-first: the chain-head pointer is updated last and
//! flushed to disk, so a crash leaves either the old durable head or the
//! new one, never a dangling pointer. When a probe window is exhausted
//! the lowest-height (oldest) record in it is overwritten; if every
//! record in the window is at least as recent as the incoming block the
//! put fails with [`StoreError::StoreFull`].

use crate::{BlockStore, StoreError, StoreResult};
use parking_lot::RwLock;
use spv_core::{NetworkParams, StoredBlock, COMPACT_SIZE_V2};
use spv_primitives::Hash256;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes opening every store file.
pub const SPV_FILE_MAGIC: [u8; 4] = *b"SPVB";

/// Default number of record slots for a new file.
pub const DEFAULT_FILE_CAPACITY: u32 = 10_000;

/// On-disk format version.
const FILE_VERSION: u32 = 1;

/// Magic, version, chain-head hash.
const FILE_HEADER_BYTES: u64 = 4 + 4 + 32;

/// Offset of the chain-head hash within the file header.
const HEAD_HASH_OFFSET: u64 = 8;

const RECORD_SIZE: u64 = COMPACT_SIZE_V2 as u64;

/// Slots examined past the home slot before eviction kicks in.
const PROBE_WINDOW: u64 = 16;

/// The fixed array of record slots.
struct Ring {
    file: File,
    capacity: u64,
}

impl Ring {
    fn slot_of(&self, hash: &Hash256) -> u64 {
        let bytes = hash.as_bytes();
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&bytes[24..32]);
        u64::from_le_bytes(tail) % self.capacity
    }

    fn record_offset(slot: u64) -> u64 {
        FILE_HEADER_BYTES + slot * RECORD_SIZE
    }

    fn probe_window(&self) -> u64 {
        PROBE_WINDOW.min(self.capacity)
    }

    fn read_slot(&self, slot: u64) -> StoreResult<Option<StoredBlock>> {
        let mut buf = [0u8; COMPACT_SIZE_V2];
        self.file.read_exact_at(&mut buf, Self::record_offset(slot))?;
        if buf.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        Ok(Some(StoredBlock::deserialize_compact_v2(&buf)?))
    }

    fn write_slot(&self, slot: u64, block: &StoredBlock) -> StoreResult<()> {
        let bytes = block.serialize_compact_v2()?;
        self.file.write_all_at(&bytes, Self::record_offset(slot))?;
        Ok(())
    }

    fn find(&self, hash: &Hash256) -> StoreResult<Option<StoredBlock>> {
        let base = self.slot_of(hash);
        for i in 0..self.probe_window() {
            let slot = (base + i) % self.capacity;
            match self.read_slot(slot)? {
                // Probe chains never contain holes: eviction replaces
                // records, it does not clear them. An empty slot ends
                // the chain.
                None => return Ok(None),
                Some(block) if block.hash() == *hash => return Ok(Some(block)),
                Some(_) => continue,
            }
        }
        Ok(None)
    }

    fn insert(&self, block: &StoredBlock) -> StoreResult<()> {
        let hash = block.hash();
        let base = self.slot_of(&hash);
        let mut eldest: Option<(u64, u32)> = None;
        for i in 0..self.probe_window() {
            let slot = (base + i) % self.capacity;
            match self.read_slot(slot)? {
                None => return self.write_slot(slot, block),
                Some(existing) => {
                    if existing.hash() == hash {
                        return self.write_slot(slot, block);
                    }
                    if eldest.map(|(_, h)| existing.height() < h).unwrap_or(true) {
                        eldest = Some((slot, existing.height()));
                    }
                }
            }
        }
        match eldest {
            Some((slot, height)) if height < block.height() => {
                debug!(slot, evicted_height = height, "SPV store evicting oldest record");
                self.write_slot(slot, block)
            }
            _ => Err(StoreError::StoreFull),
        }
    }

    fn write_head_hash(&self, hash: &Hash256) -> StoreResult<()> {
        self.file.write_all_at(hash.as_bytes(), HEAD_HASH_OFFSET)?;
        self.file.sync_data()?;
        Ok(())
    }
}

struct FileState {
    ring: Ring,
    head: StoredBlock,
}

/// A block store over one pre-sized file.
pub struct SpvFileStore {
    state: RwLock<Option<FileState>>,
    path: PathBuf,
}

impl SpvFileStore {
    /// Open the store at `path`, creating and seeding it with the
    /// network's genesis block when the file does not exist yet.
    pub fn open(params: &NetworkParams, path: &Path) -> StoreResult<Self> {
        Self::open_with_capacity(params, path, DEFAULT_FILE_CAPACITY)
    }

    /// Open with an explicit slot count for newly-created files. The
    /// capacity of an existing file is fixed by its length.
    pub fn open_with_capacity(
        params: &NetworkParams,
        path: &Path,
        capacity: u32,
    ) -> StoreResult<Self> {
        if capacity == 0 {
            return Err(StoreError::Corrupt("capacity must be positive".into()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let state = if len == 0 {
            Self::init_new_store(params, file, capacity as u64)?
        } else {
            Self::open_existing(file, len)?
        };
        info!(
            path = %path.display(),
            capacity = state.ring.capacity,
            head_height = state.head.height(),
            "SPV block store ready"
        );
        Ok(SpvFileStore {
            state: RwLock::new(Some(state)),
            path: path.to_path_buf(),
        })
    }

    /// The file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_new_store(params: &NetworkParams, file: File, capacity: u64) -> StoreResult<FileState> {
        file.set_len(FILE_HEADER_BYTES + capacity * RECORD_SIZE)?;
        let ring = Ring { file, capacity };
        let genesis = params.genesis_stored()?;
        ring.insert(&genesis)?;
        ring.file.write_all_at(&SPV_FILE_MAGIC, 0)?;
        ring.file.write_all_at(&FILE_VERSION.to_le_bytes(), 4)?;
        ring.write_head_hash(&genesis.hash())?;
        Ok(FileState {
            ring,
            head: genesis,
        })
    }

    fn open_existing(file: File, len: u64) -> StoreResult<FileState> {
        if len < FILE_HEADER_BYTES || (len - FILE_HEADER_BYTES) % RECORD_SIZE != 0 {
            return Err(StoreError::Corrupt(format!(
                "file length {} does not fit the record layout",
                len
            )));
        }
        let mut magic = [0u8; 4];
        file.read_exact_at(&mut magic, 0)?;
        if magic != SPV_FILE_MAGIC {
            return Err(StoreError::Corrupt(format!("bad magic {:02x?}", magic)));
        }
        let mut version = [0u8; 4];
        file.read_exact_at(&mut version, 4)?;
        let version = u32::from_le_bytes(version);
        if version != FILE_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let mut head_hash = [0u8; 32];
        file.read_exact_at(&mut head_hash, HEAD_HASH_OFFSET)?;
        let head_hash = Hash256::from_bytes(head_hash);

        let ring = Ring {
            capacity: (len - FILE_HEADER_BYTES) / RECORD_SIZE,
            file,
        };
        // Resolve the head pointer through the ring itself; a pointer
        // to nowhere means the file is not trustworthy.
        let head = ring.find(&head_hash)?.ok_or_else(|| {
            StoreError::Corrupt(format!("chain head {} has no record", head_hash))
        })?;
        Ok(FileState { ring, head })
    }
}

impl BlockStore for SpvFileStore {
    fn put(&self, block: StoredBlock) -> StoreResult<()> {
        let guard = self.state.write();
        let state = guard.as_ref().ok_or(StoreError::Closed)?;
        state.ring.insert(&block)
    }

    fn get(&self, hash: &Hash256) -> StoreResult<Option<StoredBlock>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(StoreError::Closed)?;
        state.ring.find(hash)
    }

    fn chain_head(&self) -> StoreResult<StoredBlock> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(state.head.clone())
    }

    fn set_chain_head(&self, block: StoredBlock) -> StoreResult<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StoreError::Closed)?;
        state.ring.write_head_hash(&block.hash())?;
        state.head = block;
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        let mut guard = self.state.write();
        if let Some(state) = guard.take() {
            state.ring.file.sync_all()?;
        }
        Ok(())
    }
}
