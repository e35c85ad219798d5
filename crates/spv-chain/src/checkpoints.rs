//! Checkpoint loading and chain bootstrap.
//!
//! Checkpoints are trusted stored blocks shipped as a text file, one
//! base64 value per line:
//!
//! ```text
//! TXT CHECKPOINTS 1
//! <number of signatures>
//! <signature lines...>
//! <number of checkpoints>
//! <checkpoint lines...>
//! ```
//!
//! The signatures cover the SHA-256 of the big-endian checkpoint count
//! followed by the raw record bytes in order. They are decoded and
//! exposed for out-of-band verification but never checked here. Each
//! checkpoint line is a compact stored-block record in either the wide
//! or the packed format.

use crate::error::CheckpointError;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use spv_core::{NetworkParams, StoredBlock, COMPACT_SIZE_V1, COMPACT_SIZE_V2};
use spv_primitives::{sha256, Hash256};
use spv_store::BlockStore;
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::{debug, info};

/// First line of the textual checkpoint format.
pub const TEXTUAL_MAGIC: &str = "TXT CHECKPOINTS 1";

/// Upper bound on the signature count field.
const MAX_SIGNATURES: usize = 256;

/// Clock-drift allowance subtracted before picking a bootstrap
/// checkpoint: headers may carry timestamps up to this far off.
const BOOTSTRAP_DRIFT_SECS: u32 = 7 * 24 * 60 * 60;

/// Vends trusted stored blocks for points throughout the chain.
///
/// Checkpoints serve two purposes: they constrain deep reorganizations
/// to recent history, and they let a fresh store start synchronizing
/// near the present instead of at genesis.
pub struct CheckpointManager {
    params: NetworkParams,
    /// Keyed by header timestamp. Never mutated after load.
    checkpoints: BTreeMap<u32, StoredBlock>,
    signatures: Vec<Vec<u8>>,
    data_hash: Hash256,
}

impl CheckpointManager {
    /// Parse a checkpoint stream for `params`' network.
    pub fn load<R: BufRead>(params: NetworkParams, reader: R) -> Result<Self, CheckpointError> {
        let mut lines = reader.lines();
        let mut next_line = move || -> Result<String, CheckpointError> {
            lines
                .next()
                .transpose()?
                .ok_or_else(|| CheckpointError::Malformed("unexpected end of stream".into()))
        };

        let magic = next_line()?;
        if magic != TEXTUAL_MAGIC {
            return Err(CheckpointError::BadMagic(magic));
        }

        let num_sigs: usize = next_line()?
            .trim()
            .parse()
            .map_err(|_| CheckpointError::BadCount("unparseable signature count".into()))?;
        if num_sigs > MAX_SIGNATURES {
            return Err(CheckpointError::BadCount(format!(
                "{} signatures, limit {}",
                num_sigs, MAX_SIGNATURES
            )));
        }
        let mut signatures = Vec::with_capacity(num_sigs);
        for _ in 0..num_sigs {
            signatures.push(decode_base64(&next_line()?)?);
        }

        let num_checkpoints: usize = next_line()?
            .trim()
            .parse()
            .map_err(|_| CheckpointError::BadCount("unparseable checkpoint count".into()))?;
        if num_checkpoints == 0 {
            return Err(CheckpointError::BadCount("no checkpoints".into()));
        }

        // The signed payload: big-endian count, then the raw records.
        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(&(num_checkpoints as u32).to_be_bytes());

        let mut checkpoints = BTreeMap::new();
        for _ in 0..num_checkpoints {
            let bytes = decode_base64(&next_line()?)?;
            if bytes.len() != COMPACT_SIZE_V1 && bytes.len() != COMPACT_SIZE_V2 {
                return Err(CheckpointError::BadRecordSize(bytes.len()));
            }
            signed_data.extend_from_slice(&bytes);
            let block = StoredBlock::deserialize_compact(&bytes)?;
            debug!(height = block.height(), time = block.header().time(), "read checkpoint");
            checkpoints.insert(block.header().time(), block);
        }
        let data_hash = sha256(&signed_data);

        info!(
            count = checkpoints.len(),
            last_time = checkpoints.keys().next_back().copied().unwrap_or(0),
            data_hash = %hex::encode(data_hash.as_bytes()),
            "read checkpoints"
        );
        Ok(CheckpointManager {
            params,
            checkpoints,
            signatures,
            data_hash,
        })
    }

    /// Number of checkpoints loaded.
    pub fn num_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// SHA-256 over the count-prefixed concatenated records; what the
    /// shipped signatures sign.
    pub fn data_hash(&self) -> Hash256 {
        self.data_hash
    }

    /// The decoded signature blobs, in file order. Not verified here.
    pub fn signatures(&self) -> &[Vec<u8>] {
        &self.signatures
    }

    /// The last checkpoint whose header time is at or before `time`,
    /// typically the earliest wallet birthday. Falls back to a
    /// synthesized genesis stored-block when every checkpoint is later.
    pub fn checkpoint_before(&self, time: u32) -> Result<StoredBlock, CheckpointError> {
        if let Some((_, block)) = self.checkpoints.range(..=time).next_back() {
            return Ok(block.clone());
        }
        Ok(self.params.genesis_stored()?)
    }

    /// Seed a fresh block store: pick the checkpoint for `time` (less a
    /// week of clock-drift allowance), insert it, and make it the chain
    /// head.
    pub fn bootstrap(
        &self,
        store: &dyn BlockStore,
        time: u32,
    ) -> Result<StoredBlock, CheckpointError> {
        let adjusted = time.saturating_sub(BOOTSTRAP_DRIFT_SECS);
        info!(
            time,
            adjusted, "initializing block store from a checkpoint"
        );
        let checkpoint = self.checkpoint_before(adjusted)?;
        store.put(checkpoint.clone())?;
        store.set_chain_head(checkpoint.clone())?;
        Ok(checkpoint)
    }

    /// One-shot convenience: load a checkpoint stream and seed `store`
    /// for `time`.
    pub fn bootstrap_from<R: BufRead>(
        params: NetworkParams,
        reader: R,
        store: &dyn BlockStore,
        time: u32,
    ) -> Result<StoredBlock, CheckpointError> {
        Self::load(params, reader)?.bootstrap(store, time)
    }
}

/// Decode a base64 line, tolerating both padded and unpadded forms (the
/// reference writer omits padding).
fn decode_base64(line: &str) -> Result<Vec<u8>, CheckpointError> {
    let trimmed = line.trim_end().trim_end_matches('=');
    STANDARD_NO_PAD
        .decode(trimmed)
        .map_err(|e| CheckpointError::Malformed(e.to_string()))
}
