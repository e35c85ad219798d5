//! Block headers, blocks, and the verification rules checkable without
//! a transaction index.

use crate::error::{VerificationError, VerifyResult};
use crate::merkle::merkle_root;
use crate::params::ValidationPolicy;
use crate::transaction::Transaction;
use once_cell::sync::OnceCell;
use num_bigint::BigUint;
use spv_primitives::{
    dsha256, dsha256_concat, var_int_size, ByteReader, ByteWriter, CodecError, CodecResult,
    CompactTarget, Hash256,
};
use std::fmt;

/// Serialized size of a block header.
pub const HEADER_SIZE: usize = 80;

/// Hard cap on the serialized size of a block, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Cap on signature operations per block; an anti-DoS measure.
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// How far a header timestamp may run ahead of wall-clock time.
pub const ALLOWED_TIME_DRIFT_SECS: u32 = 2 * 60 * 60;

/// Version of the genesis block.
pub const BLOCK_VERSION_GENESIS: u32 = 1;
/// Block version introduced by BIP-34 (height in coinbase).
pub const BLOCK_VERSION_BIP34: u32 = 2;
/// Block version introduced by BIP-66 (strict DER signatures).
pub const BLOCK_VERSION_BIP66: u32 = 3;
/// Block version introduced by BIP-65 (OP_CHECKLOCKTIMEVERIFY).
pub const BLOCK_VERSION_BIP65: u32 = 4;

/// Flags selecting optional block-body checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyFlags {
    /// Enforce BIP-34: the coinbase script must start with the block
    /// height.
    pub height_in_coinbase: bool,
}

/// An 80-byte block header.
///
/// The hash is computed on first access and cached; the setters exist
/// for test harnesses and invalidate the cache.
#[derive(Clone)]
pub struct Header {
    version: u32,
    prev_hash: Hash256,
    merkle_root: Hash256,
    time: u32,
    bits: CompactTarget,
    nonce: u32,
    hash: OnceCell<Hash256>,
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.prev_hash == other.prev_hash
            && self.merkle_root == other.merkle_root
            && self.time == other.time
            && self.bits == other.bits
            && self.nonce == other.nonce
    }
}

impl Eq for Header {}

impl Header {
    /// Assemble a header from its six fields.
    pub fn new(
        version: u32,
        prev_hash: Hash256,
        merkle_root: Hash256,
        time: u32,
        bits: CompactTarget,
        nonce: u32,
    ) -> Self {
        Header {
            version,
            prev_hash,
            merkle_root,
            time,
            bits,
            nonce,
            hash: OnceCell::new(),
        }
    }

    /// Parse exactly one header from `bytes`.
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let header = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after header",
                reader.remaining()
            )));
        }
        Ok(header)
    }

    /// Read a header, hashing the raw 80 bytes up front so the cache is
    /// warm.
    pub fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        let start = reader.position();
        let version = reader.read_u32()?;
        let prev_hash = reader.read_hash()?;
        let merkle_root = reader.read_hash()?;
        let time = reader.read_u32()?;
        let bits = CompactTarget::new(reader.read_u32()?);
        let nonce = reader.read_u32()?;
        debug_assert_eq!(reader.position() - start, HEADER_SIZE);

        let header = Header::new(version, prev_hash, merkle_root, time, bits, nonce);
        let _ = header.hash.set(dsha256(&header.serialize()));
        Ok(header)
    }

    /// Write the 80-byte wire form.
    pub fn write(&self, writer: &mut ByteWriter) {
        writer.put_u32(self.version);
        writer.put_hash(&self.prev_hash);
        writer.put_hash(&self.merkle_root);
        writer.put_u32(self.time);
        writer.put_u32(self.bits.compact());
        writer.put_u32(self.nonce);
    }

    /// The 80 serialized bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(HEADER_SIZE);
        self.write(&mut writer);
        writer.into_vec()
    }

    /// The header hash (natural order), cached after the first
    /// computation.
    pub fn hash(&self) -> Hash256 {
        *self.hash.get_or_init(|| dsha256(&self.serialize()))
    }

    /// The work this header represents.
    pub fn work(&self) -> CodecResult<BigUint> {
        self.bits.work()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn prev_hash(&self) -> Hash256 {
        self.prev_hash
    }

    pub fn merkle_root(&self) -> Hash256 {
        self.merkle_root
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn bits(&self) -> CompactTarget {
        self.bits
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// Whether this header claims BIP-34 rules (height in coinbase).
    pub fn is_bip34(&self) -> bool {
        self.version >= BLOCK_VERSION_BIP34
    }

    /// Whether this header claims BIP-66 rules (strict DER).
    pub fn is_bip66(&self) -> bool {
        self.version >= BLOCK_VERSION_BIP66
    }

    /// Whether this header claims BIP-65 rules (CLTV).
    pub fn is_bip65(&self) -> bool {
        self.version >= BLOCK_VERSION_BIP65
    }

    /// Set the timestamp. Test harness use; invalidates the cached hash.
    pub fn set_time(&mut self, time: u32) {
        self.time = time;
        self.hash = OnceCell::new();
    }

    /// Set the nonce. Test harness use; invalidates the cached hash.
    pub fn set_nonce(&mut self, nonce: u32) {
        self.nonce = nonce;
        self.hash = OnceCell::new();
    }

    /// Set the difficulty target. Test harness use; invalidates the
    /// cached hash.
    pub fn set_bits(&mut self, bits: CompactTarget) {
        self.bits = bits;
        self.hash = OnceCell::new();
    }

    /// Set the Merkle root. Test harness use; invalidates the cached
    /// hash.
    pub fn set_merkle_root(&mut self, merkle_root: Hash256) {
        self.merkle_root = merkle_root;
        self.hash = OnceCell::new();
    }

    /// Verify what a lone header can prove: its work and its timestamp.
    pub fn verify(&self, policy: &ValidationPolicy) -> VerifyResult<()> {
        self.check_proof_of_work(policy)?;
        self.check_timestamp(policy)
    }

    /// The proof-of-work check. The hash must not exceed the target the
    /// header itself claims; whether that target is the *right* one is
    /// the chain engine's job, since it needs the preceding blocks.
    fn check_proof_of_work(&self, policy: &ValidationPolicy) -> VerifyResult<()> {
        if policy.relax_pow {
            return Ok(());
        }
        if !self.bits.is_met_by(&self.hash())? {
            return Err(VerificationError::PowBelowTarget {
                hash: self.hash(),
                target: self.bits,
            });
        }
        Ok(())
    }

    fn check_timestamp(&self, policy: &ValidationPolicy) -> VerifyResult<()> {
        let allowed = policy.clock.now().saturating_add(ALLOWED_TIME_DRIFT_SECS);
        if self.time > allowed {
            return Err(VerificationError::TimestampTooFarAhead {
                time: self.time,
                allowed,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash())
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("hash", &self.hash().to_string())
            .field("version", &self.version)
            .field("prev_hash", &self.prev_hash.to_string())
            .field("time", &self.time)
            .field("bits", &self.bits)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// A block: a header plus, when the body was transferred, its
/// transactions.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    header: Header,
    /// `None` for header-only blocks; such blocks still hash normally.
    transactions: Option<Vec<Transaction>>,
}

impl Block {
    /// Assemble a block from a header and an optional body.
    pub fn new(header: Header, transactions: Option<Vec<Transaction>>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    /// Parse a block (or bare header) from `bytes`, requiring the whole
    /// buffer to be consumed.
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let block = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after block",
                reader.remaining()
            )));
        }
        Ok(block)
    }

    /// Read a block from a reader. Remaining bytes after the header are
    /// interpreted as the transaction list; none means header-only.
    pub fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        let header = Header::read(reader)?;
        let transactions = if reader.is_empty() {
            None
        } else {
            let count = reader.read_var_int()?;
            let mut transactions = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                transactions.push(Transaction::read(reader)?);
            }
            Some(transactions)
        };
        Ok(Block {
            header,
            transactions,
        })
    }

    /// Serialize to the wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.message_size());
        self.header.write(&mut writer);
        if let Some(transactions) = &self.transactions {
            writer.put_var_int(transactions.len() as u64);
            for tx in transactions {
                tx.write(&mut writer);
            }
        }
        writer.into_vec()
    }

    /// Serialized size in bytes.
    pub fn message_size(&self) -> usize {
        match &self.transactions {
            None => HEADER_SIZE,
            Some(transactions) => {
                HEADER_SIZE
                    + var_int_size(transactions.len() as u64)
                    + transactions.iter().map(Transaction::total_size).sum::<usize>()
            }
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The block hash, i.e. the header hash.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// A header-only copy, keeping the cached hash warm.
    pub fn as_header(&self) -> Header {
        self.header.clone()
    }

    pub fn is_header_only(&self) -> bool {
        self.transactions.is_none()
    }

    pub fn has_transactions(&self) -> bool {
        self.transactions
            .as_ref()
            .map(|txs| !txs.is_empty())
            .unwrap_or(false)
    }

    /// The transactions, if the body is present.
    pub fn transactions(&self) -> Option<&[Transaction]> {
        self.transactions.as_deref()
    }

    /// Number of transactions; zero for header-only blocks.
    pub fn transaction_count(&self) -> usize {
        self.transactions.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Recompute the Merkle root from the transaction ids.
    pub fn compute_merkle_root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self
            .transactions
            .iter()
            .flatten()
            .map(Transaction::txid)
            .collect();
        merkle_root(&leaves)
    }

    /// Compute the witness root: the Merkle tree over wtxids with the
    /// coinbase leaf forced to zero.
    pub fn compute_witness_root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self
            .transactions
            .iter()
            .flatten()
            .map(|tx| {
                if tx.is_coinbase() {
                    Hash256::ZERO
                } else {
                    tx.wtxid()
                }
            })
            .collect();
        merkle_root(&leaves)
    }

    /// Verify the header rules: proof of work and timestamp drift.
    pub fn verify_header(&self, policy: &ValidationPolicy) -> VerifyResult<()> {
        self.header.verify(policy)
    }

    /// Verify that the body matches the header and the structural block
    /// rules. Per-transaction script validity is the external verifier's
    /// concern.
    ///
    /// `height` feeds the BIP-34 check when
    /// [`VerifyFlags::height_in_coinbase`] is set.
    pub fn verify_transactions(&self, height: Option<u32>, flags: VerifyFlags) -> VerifyResult<()> {
        let transactions = match &self.transactions {
            Some(txs) if !txs.is_empty() => txs,
            _ => return Err(VerificationError::EmptyBlock),
        };

        let size = self.message_size();
        if size > MAX_BLOCK_SIZE {
            return Err(VerificationError::OversizedBlock {
                size,
                max: MAX_BLOCK_SIZE,
            });
        }

        if !transactions[0].is_coinbase() {
            return Err(VerificationError::BadCoinbasePosition { index: 0 });
        }
        if flags.height_in_coinbase {
            if let Some(height) = height {
                transactions[0].check_coinbase_height(height)?;
            }
        }
        for (index, tx) in transactions.iter().enumerate().skip(1) {
            if tx.is_coinbase() {
                return Err(VerificationError::BadCoinbasePosition { index });
            }
        }

        let computed = self.compute_merkle_root();
        if computed != self.header.merkle_root {
            tracing::error!(block = %self.hash(), "merkle tree did not verify");
            return Err(VerificationError::MerkleMismatch {
                computed,
                header: self.header.merkle_root,
            });
        }

        let sigops: usize = transactions.iter().map(Transaction::sig_op_count).sum();
        if sigops > MAX_BLOCK_SIGOPS {
            return Err(VerificationError::SigOpsExceeded {
                count: sigops,
                max: MAX_BLOCK_SIGOPS,
            });
        }

        for tx in transactions {
            tx.verify_structure()?;
        }

        Ok(())
    }

    /// Verify the segwit commitment: the coinbase's commitment output
    /// must match the witness root combined with the reserved value. A
    /// block without a commitment must carry no witness data at all.
    pub fn verify_witness_commitment(&self) -> VerifyResult<()> {
        let transactions = match &self.transactions {
            Some(txs) if !txs.is_empty() => txs,
            _ => return Err(VerificationError::EmptyBlock),
        };
        let coinbase = &transactions[0];
        if !coinbase.is_coinbase() {
            return Err(VerificationError::BadCoinbasePosition { index: 0 });
        }

        match coinbase.find_witness_commitment() {
            Some(committed) => {
                let witness = &coinbase.inputs()[0].witness;
                if witness.push_count() != 1 {
                    return Err(VerificationError::BadWitnessReserved(format!(
                        "push count {}",
                        witness.push_count()
                    )));
                }
                let reserved = witness.push(0).unwrap_or(&[]);
                if reserved.len() != 32 {
                    return Err(VerificationError::BadWitnessReserved(format!(
                        "length {}",
                        reserved.len()
                    )));
                }
                let root = self.compute_witness_root();
                let computed = dsha256_concat(root.as_bytes(), reserved);
                if computed != committed {
                    return Err(VerificationError::WitnessCommitmentMismatch {
                        computed,
                        committed,
                    });
                }
                Ok(())
            }
            None => {
                if transactions.iter().any(Transaction::has_witnesses) {
                    return Err(VerificationError::UnexpectedWitness);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_header_only() {
            write!(f, "block {} (header-only)", self.hash())
        } else {
            write!(
                f,
                "block {} with {} transaction(s)",
                self.hash(),
                self.transaction_count()
            )
        }
    }
}
