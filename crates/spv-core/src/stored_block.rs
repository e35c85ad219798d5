//! A block header enriched with its chain position: cumulative work and
//! height.
//!
//! Stored blocks are what block stores persist. Two compact encodings
//! exist and both must stay readable: the original wide format with a
//! 32-byte work field, and the packed format that truncates the work to
//! 12 bytes (enough for decades of accumulation). The format of a record
//! is recognized by its length.

use crate::block::{Header, HEADER_SIZE};
use num_bigint::BigUint;
use spv_primitives::{ByteReader, CodecError, CodecResult};
use std::fmt;

/// Work field width in the wide (v1) encoding.
const CHAIN_WORK_BYTES_V1: usize = 32;
/// Work field width in the packed (v2) encoding.
const CHAIN_WORK_BYTES_V2: usize = 12;

/// Record length of the wide encoding: work, big-endian height, header.
pub const COMPACT_SIZE_V1: usize = CHAIN_WORK_BYTES_V1 + 4 + HEADER_SIZE;
/// Record length of the packed encoding.
pub const COMPACT_SIZE_V2: usize = CHAIN_WORK_BYTES_V2 + 4 + HEADER_SIZE;

/// A header plus the cumulative work and height of the chain ending in
/// it. Immutable once created.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StoredBlock {
    header: Header,
    chain_work: BigUint,
    height: u32,
}

impl StoredBlock {
    /// Wrap a header with its chain position.
    pub fn new(header: Header, chain_work: BigUint, height: u32) -> Self {
        StoredBlock {
            header,
            chain_work,
            height,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The block hash, delegating to the header.
    pub fn hash(&self) -> spv_primitives::Hash256 {
        self.header.hash()
    }

    /// Total work from genesis up to and including this block.
    pub fn chain_work(&self) -> &BigUint {
        &self.chain_work
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether this block's chain carries strictly more work than
    /// `other`'s.
    pub fn more_work_than(&self, other: &StoredBlock) -> bool {
        self.chain_work > other.chain_work
    }

    /// Wrap `header` as this block's successor: one higher, heavier by
    /// the header's own work.
    pub fn build_next(&self, header: Header) -> CodecResult<StoredBlock> {
        let work = header.work()?;
        Ok(StoredBlock {
            header,
            chain_work: &self.chain_work + work,
            height: self.height + 1,
        })
    }

    fn work_bytes(&self, width: usize) -> CodecResult<Vec<u8>> {
        let raw = self.chain_work.to_bytes_be();
        if raw.len() > width {
            return Err(CodecError::Malformed(format!(
                "chain work of {} bytes does not fit {}-byte field",
                raw.len(),
                width
            )));
        }
        let mut out = vec![0u8; width];
        out[width - raw.len()..].copy_from_slice(&raw);
        Ok(out)
    }

    fn serialize_with_width(&self, width: usize) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(width + 4 + HEADER_SIZE);
        out.extend_from_slice(&self.work_bytes(width)?);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.header.serialize());
        Ok(out)
    }

    /// Encode in the wide (v1) format. Fails only if the cumulative work
    /// exceeds 256 bits, which the difficulty rules make impossible.
    pub fn serialize_compact_v1(&self) -> CodecResult<Vec<u8>> {
        self.serialize_with_width(CHAIN_WORK_BYTES_V1)
    }

    /// Encode in the packed (v2) format. Fails once the cumulative work
    /// no longer fits 12 bytes; callers fall back to v1.
    pub fn serialize_compact_v2(&self) -> CodecResult<Vec<u8>> {
        self.serialize_with_width(CHAIN_WORK_BYTES_V2)
    }

    /// Encode in the packed format when the work still fits, in the wide
    /// format otherwise.
    pub fn serialize_compact(&self) -> CodecResult<Vec<u8>> {
        if self.chain_work.bits() as usize <= CHAIN_WORK_BYTES_V2 * 8 {
            self.serialize_compact_v2()
        } else {
            self.serialize_compact_v1()
        }
    }

    fn deserialize_with_width(bytes: &[u8], width: usize) -> CodecResult<StoredBlock> {
        let expected = width + 4 + HEADER_SIZE;
        if bytes.len() != expected {
            return Err(CodecError::Malformed(format!(
                "stored block record of {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let chain_work = BigUint::from_bytes_be(&bytes[..width]);
        let mut height_bytes = [0u8; 4];
        height_bytes.copy_from_slice(&bytes[width..width + 4]);
        let height = u32::from_be_bytes(height_bytes);
        let mut reader = ByteReader::new(&bytes[width + 4..]);
        let header = Header::read(&mut reader)?;
        Ok(StoredBlock {
            header,
            chain_work,
            height,
        })
    }

    /// Decode a wide (v1) record.
    pub fn deserialize_compact_v1(bytes: &[u8]) -> CodecResult<StoredBlock> {
        Self::deserialize_with_width(bytes, CHAIN_WORK_BYTES_V1)
    }

    /// Decode a packed (v2) record.
    pub fn deserialize_compact_v2(bytes: &[u8]) -> CodecResult<StoredBlock> {
        Self::deserialize_with_width(bytes, CHAIN_WORK_BYTES_V2)
    }

    /// Decode either format, recognized by record length.
    pub fn deserialize_compact(bytes: &[u8]) -> CodecResult<StoredBlock> {
        match bytes.len() {
            COMPACT_SIZE_V1 => Self::deserialize_compact_v1(bytes),
            COMPACT_SIZE_V2 => Self::deserialize_compact_v2(bytes),
            other => Err(CodecError::Malformed(format!(
                "unexpected stored block record length {}",
                other
            ))),
        }
    }
}

impl fmt::Display for StoredBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {} at height {}", self.hash(), self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NetworkParams;
    use num_traits::One;

    fn genesis_stored() -> StoredBlock {
        NetworkParams::mainnet().genesis_stored().unwrap()
    }

    #[test]
    fn record_sizes() {
        assert_eq!(COMPACT_SIZE_V1, 116);
        assert_eq!(COMPACT_SIZE_V2, 96);
    }

    #[test]
    fn v1_round_trip() {
        let stored = genesis_stored();
        let bytes = stored.serialize_compact_v1().unwrap();
        assert_eq!(bytes.len(), COMPACT_SIZE_V1);
        assert_eq!(StoredBlock::deserialize_compact_v1(&bytes).unwrap(), stored);
    }

    #[test]
    fn v2_round_trip() {
        let stored = genesis_stored();
        let bytes = stored.serialize_compact_v2().unwrap();
        assert_eq!(bytes.len(), COMPACT_SIZE_V2);
        assert_eq!(StoredBlock::deserialize_compact_v2(&bytes).unwrap(), stored);
    }

    #[test]
    fn length_dispatch() {
        let stored = genesis_stored();
        for bytes in [
            stored.serialize_compact_v1().unwrap(),
            stored.serialize_compact_v2().unwrap(),
        ] {
            assert_eq!(StoredBlock::deserialize_compact(&bytes).unwrap(), stored);
        }
        assert!(StoredBlock::deserialize_compact(&[0u8; 50]).is_err());
    }

    #[test]
    fn layout_is_work_height_header() {
        let stored = genesis_stored();
        let bytes = stored.serialize_compact_v2().unwrap();
        // 4,295,032,833 = 0x0100010001 big-endian in the work field tail.
        assert_eq!(&bytes[..12], &[0, 0, 0, 0, 0, 0, 0, 1, 0, 1, 0, 1]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
        assert_eq!(&bytes[16..], stored.header().serialize().as_slice());
    }

    #[test]
    fn wide_work_rejects_v2() {
        let genesis = genesis_stored();
        let too_heavy = StoredBlock::new(
            genesis.header().clone(),
            BigUint::one() << (CHAIN_WORK_BYTES_V2 * 8),
            1,
        );
        assert!(too_heavy.serialize_compact_v2().is_err());
        // The adaptive encoder falls back to the wide format.
        let bytes = too_heavy.serialize_compact().unwrap();
        assert_eq!(bytes.len(), COMPACT_SIZE_V1);
        assert_eq!(
            StoredBlock::deserialize_compact(&bytes).unwrap(),
            too_heavy
        );
    }

    #[test]
    fn build_next_accumulates() {
        let genesis = genesis_stored();
        // A fabricated child of genesis, same difficulty.
        let child = Header::new(
            1,
            genesis.hash(),
            spv_primitives::Hash256::ZERO,
            genesis.header().time() + 600,
            genesis.header().bits(),
            7,
        );
        let next = genesis.build_next(child).unwrap();
        assert_eq!(next.height(), 1);
        assert_eq!(
            next.chain_work(),
            &(genesis.chain_work() + genesis.chain_work())
        );
        assert!(next.more_work_than(&genesis));
    }
}
