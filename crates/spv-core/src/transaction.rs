//! Transaction structure and wire codec.
//!
//! Transactions are parsed from and serialized to the exact peer-to-peer
//! byte layout, including the segwit marker/flag and per-input witness
//! stacks. Two identifiers exist: the txid hashes the legacy layout
//! (without witnesses) and the wtxid hashes the full segwit layout. Both
//! are computed once and frozen; transactions are immutable after
//! construction.

use crate::error::{VerificationError, VerifyResult};
use crate::script;
use once_cell::sync::OnceCell;
use spv_primitives::{dsha256, var_int_size, ByteReader, ByteWriter, CodecError, CodecResult, Hash256};
use std::fmt;

/// Marker byte announcing a segwit serialization.
const SEGWIT_MARKER: u8 = 0x00;
/// The only defined segwit flag value.
const SEGWIT_FLAG: u8 = 0x01;

/// Total coin supply in satoshis; no output or output sum may exceed it.
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Reference to an output of a previous transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutPoint {
    /// Hash of the referenced transaction, natural order.
    pub hash: Hash256,
    /// Index of the output within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint only the coinbase may carry.
    pub const NULL: OutPoint = OutPoint {
        hash: Hash256::ZERO,
        index: 0xffff_ffff,
    };

    /// Whether this is the coinbase's null reference.
    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == 0xffff_ffff
    }

    fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(OutPoint {
            hash: reader.read_hash()?,
            index: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut ByteWriter) {
        writer.put_hash(&self.hash);
        writer.put_u32(self.index);
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

/// The witness stack of one input: zero or more byte pushes.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Witness(Vec<Vec<u8>>);

impl Witness {
    /// An empty stack (legacy input).
    pub fn empty() -> Self {
        Witness(Vec::new())
    }

    /// Wrap a list of pushes.
    pub fn from_pushes(pushes: Vec<Vec<u8>>) -> Self {
        Witness(pushes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_count(&self) -> usize {
        self.0.len()
    }

    /// The `index`-th push, if present.
    pub fn push(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(|p| p.as_slice())
    }

    fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        let count = reader.read_var_int()?;
        let mut pushes = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            pushes.push(reader.read_var_bytes()?);
        }
        Ok(Witness(pushes))
    }

    fn write(&self, writer: &mut ByteWriter) {
        writer.put_var_int(self.0.len() as u64);
        for push in &self.0 {
            writer.put_var_bytes(push);
        }
    }

    fn serialized_size(&self) -> usize {
        var_int_size(self.0.len() as u64)
            + self
                .0
                .iter()
                .map(|p| var_int_size(p.len() as u64) + p.len())
                .sum::<usize>()
    }
}

/// A transaction input.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxIn {
    /// The output this input spends.
    pub outpoint: OutPoint,
    /// Unlocking script.
    pub script_sig: Vec<u8>,
    /// Sequence number (relative locktime / RBF signaling).
    pub sequence: u32,
    /// Segwit witness stack; empty for legacy inputs.
    pub witness: Witness,
}

impl TxIn {
    fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(TxIn {
            outpoint: OutPoint::read(reader)?,
            script_sig: reader.read_var_bytes()?,
            sequence: reader.read_u32()?,
            witness: Witness::empty(),
        })
    }

    fn write(&self, writer: &mut ByteWriter) {
        self.outpoint.write(writer);
        writer.put_var_bytes(&self.script_sig);
        writer.put_u32(self.sequence);
    }

    fn serialized_size(&self) -> usize {
        36 + var_int_size(self.script_sig.len() as u64) + self.script_sig.len() + 4
    }
}

/// A transaction output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxOut {
    /// Amount in satoshis.
    pub value: u64,
    /// Locking script.
    pub script_pub_key: Vec<u8>,
}

impl TxOut {
    fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(TxOut {
            value: reader.read_u64()?,
            script_pub_key: reader.read_var_bytes()?,
        })
    }

    fn write(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.value);
        writer.put_var_bytes(&self.script_pub_key);
    }

    fn serialized_size(&self) -> usize {
        8 + var_int_size(self.script_pub_key.len() as u64) + self.script_pub_key.len()
    }
}

/// A Bitcoin transaction.
///
/// Immutable after construction; the txid and wtxid are computed lazily
/// and cached.
#[derive(Clone, Debug)]
pub struct Transaction {
    version: u32,
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    lock_time: u32,
    txid: OnceCell<Hash256>,
    wtxid: OnceCell<Hash256>,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.lock_time == other.lock_time
    }
}

impl Eq for Transaction {}

impl Transaction {
    /// Assemble a transaction from parts.
    pub fn new(version: u32, inputs: Vec<TxIn>, outputs: Vec<TxOut>, lock_time: u32) -> Self {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            txid: OnceCell::new(),
            wtxid: OnceCell::new(),
        }
    }

    /// Build a coinbase transaction with the given unlocking script and
    /// outputs.
    pub fn coinbase(script_sig: Vec<u8>, outputs: Vec<TxOut>) -> Self {
        let input = TxIn {
            outpoint: OutPoint::NULL,
            script_sig,
            sequence: 0xffff_ffff,
            witness: Witness::empty(),
        };
        Transaction::new(1, vec![input], outputs, 0)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn inputs(&self) -> &[TxIn] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOut] {
        &self.outputs
    }

    pub fn lock_time(&self) -> u32 {
        self.lock_time
    }

    /// Parse a transaction from the start of `bytes`, requiring the whole
    /// buffer to be consumed.
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let tx = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after transaction",
                reader.remaining()
            )));
        }
        Ok(tx)
    }

    /// Read a transaction from a reader.
    ///
    /// Segwit is detected at the input-count position: a zero there is
    /// the marker and must be followed by the 0x01 flag.
    pub fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        let version = reader.read_u32()?;
        let mut input_count = reader.read_var_int()?;
        let segwit = input_count == SEGWIT_MARKER as u64;
        if segwit {
            let flag = reader.read_u8()?;
            if flag != SEGWIT_FLAG {
                return Err(CodecError::Malformed(format!(
                    "unexpected segwit flag {:#04x}",
                    flag
                )));
            }
            input_count = reader.read_var_int()?;
        }

        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            inputs.push(TxIn::read(reader)?);
        }

        let output_count = reader.read_var_int()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            outputs.push(TxOut::read(reader)?);
        }

        if segwit {
            for input in &mut inputs {
                input.witness = Witness::read(reader)?;
            }
        }

        let lock_time = reader.read_u32()?;
        Ok(Transaction::new(version, inputs, outputs, lock_time))
    }

    /// Whether any input carries witness data.
    pub fn has_witnesses(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Serialize in the form the network expects: segwit layout only when
    /// witness data is present.
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.total_size());
        self.write(&mut writer);
        writer.into_vec()
    }

    /// Serialize the legacy layout regardless of witness data (the txid
    /// preimage).
    pub fn serialize_without_witness(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(self.base_size());
        self.write_legacy(&mut writer);
        writer.into_vec()
    }

    /// Write the network form to a writer.
    pub fn write(&self, writer: &mut ByteWriter) {
        if !self.has_witnesses() {
            return self.write_legacy(writer);
        }
        writer.put_u32(self.version);
        writer.put_u8(SEGWIT_MARKER);
        writer.put_u8(SEGWIT_FLAG);
        writer.put_var_int(self.inputs.len() as u64);
        for input in &self.inputs {
            input.write(writer);
        }
        writer.put_var_int(self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(writer);
        }
        for input in &self.inputs {
            input.witness.write(writer);
        }
        writer.put_u32(self.lock_time);
    }

    fn write_legacy(&self, writer: &mut ByteWriter) {
        writer.put_u32(self.version);
        writer.put_var_int(self.inputs.len() as u64);
        for input in &self.inputs {
            input.write(writer);
        }
        writer.put_var_int(self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(writer);
        }
        writer.put_u32(self.lock_time);
    }

    /// Size of the legacy serialization in bytes.
    pub fn base_size(&self) -> usize {
        4 + var_int_size(self.inputs.len() as u64)
            + self.inputs.iter().map(TxIn::serialized_size).sum::<usize>()
            + var_int_size(self.outputs.len() as u64)
            + self.outputs.iter().map(TxOut::serialized_size).sum::<usize>()
            + 4
    }

    /// Size of the network serialization in bytes.
    pub fn total_size(&self) -> usize {
        if !self.has_witnesses() {
            return self.base_size();
        }
        self.base_size()
            + 2
            + self
                .inputs
                .iter()
                .map(|input| input.witness.serialized_size())
                .sum::<usize>()
    }

    /// BIP-141 weight: base size counted four times, witness bytes once.
    pub fn weight(&self) -> usize {
        self.base_size() * 3 + self.total_size()
    }

    /// Virtual size: weight rounded up to whole units of four.
    pub fn vsize(&self) -> usize {
        (self.weight() + 3) / 4
    }

    /// The transaction id: double SHA-256 of the legacy layout.
    pub fn txid(&self) -> Hash256 {
        *self
            .txid
            .get_or_init(|| dsha256(&self.serialize_without_witness()))
    }

    /// The witness id: double SHA-256 of the network layout. Equal to the
    /// txid for legacy transactions.
    pub fn wtxid(&self) -> Hash256 {
        *self.wtxid.get_or_init(|| dsha256(&self.serialize()))
    }

    /// Whether this is a coinbase: a single input spending the null
    /// outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].outpoint.is_null()
    }

    /// Legacy signature-operation count over all input and output
    /// scripts.
    pub fn sig_op_count(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|input| script::sig_op_count(&input.script_sig))
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|output| script::sig_op_count(&output.script_pub_key))
            .sum();
        inputs + outputs
    }

    /// Check the BIP-34 rule: the coinbase script must begin with the
    /// block height, minimally encoded.
    pub fn check_coinbase_height(&self, expected: u32) -> VerifyResult<()> {
        let expected_bytes = script::encode_coinbase_height(expected);
        let script_sig = &self.inputs[0].script_sig;
        if script_sig.len() < expected_bytes.len()
            || script_sig[..expected_bytes.len()] != expected_bytes[..]
        {
            return Err(VerificationError::BadCoinbaseHeight { expected });
        }
        Ok(())
    }

    /// Check the context-free structural rules: non-empty input and
    /// output lists, size and value bounds, no duplicate spends, and
    /// the coinbase script-size window. Script and signature semantics
    /// stay with the external verifier.
    pub fn verify_structure(&self) -> VerifyResult<()> {
        if self.inputs.is_empty() {
            return Err(VerificationError::BadTransaction(format!(
                "{} has no inputs",
                self.txid()
            )));
        }
        if self.outputs.is_empty() {
            return Err(VerificationError::BadTransaction(format!(
                "{} has no outputs",
                self.txid()
            )));
        }
        if self.total_size() > crate::block::MAX_BLOCK_SIZE {
            return Err(VerificationError::BadTransaction(format!(
                "{} is larger than a block",
                self.txid()
            )));
        }

        let mut seen = std::collections::HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input.outpoint) {
                return Err(VerificationError::BadTransaction(format!(
                    "{} spends {} twice",
                    self.txid(),
                    input.outpoint
                )));
            }
        }

        let mut total: u64 = 0;
        for output in &self.outputs {
            if output.value > MAX_MONEY {
                return Err(VerificationError::BadTransaction(format!(
                    "{} output value out of range",
                    self.txid()
                )));
            }
            total = total.saturating_add(output.value);
        }
        if total > MAX_MONEY {
            return Err(VerificationError::BadTransaction(format!(
                "{} total output value out of range",
                self.txid()
            )));
        }

        if self.is_coinbase() {
            let script_len = self.inputs[0].script_sig.len();
            if !(2..=100).contains(&script_len) {
                return Err(VerificationError::BadTransaction(format!(
                    "coinbase script size {} out of range",
                    script_len
                )));
            }
        } else {
            for input in &self.inputs {
                if input.outpoint.is_null() {
                    return Err(VerificationError::BadTransaction(format!(
                        "{} has an unexpected coinbase input",
                        self.txid()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Find the segwit commitment among the outputs, scanning from the
    /// last output backwards as the reference does.
    pub fn find_witness_commitment(&self) -> Option<Hash256> {
        self.outputs
            .iter()
            .rev()
            .find_map(|output| script::witness_commitment(&output.script_pub_key))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx {} ({} in, {} out)",
            self.txid(),
            self.inputs.len(),
            self.outputs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The coinbase of mainnet block #1, byte for byte.
    const BLOCK1_COINBASE: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff0704ffff001d0104ffffffff0100f2052a0100000043410496b538e853519c726a2c91e61ec11600ae1390813a627c66fb8be7947be63c52da7589379515d4e0a604f8141781e62294721166bf621e73a82cbf2342c858eeac00000000";

    fn simple_tx() -> Transaction {
        Transaction::new(
            2,
            vec![TxIn {
                outpoint: OutPoint {
                    hash: Hash256::from_bytes([9u8; 32]),
                    index: 1,
                },
                script_sig: vec![0x51],
                sequence: 0xffff_fffe,
                witness: Witness::empty(),
            }],
            vec![TxOut {
                value: 50_000,
                script_pub_key: vec![0x51],
            }],
            101,
        )
    }

    fn segwit_tx() -> Transaction {
        let mut tx = simple_tx();
        tx.inputs[0].witness = Witness::from_pushes(vec![vec![1, 2, 3], vec![]]);
        Transaction::new(tx.version, tx.inputs, tx.outputs, tx.lock_time)
    }

    #[test]
    fn block1_coinbase_round_trips() {
        let bytes = hex::decode(BLOCK1_COINBASE).unwrap();
        let tx = Transaction::parse(&bytes).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.serialize(), bytes);
        assert_eq!(
            tx.txid().to_string(),
            "0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098"
        );
        // No witnesses: both ids agree.
        assert_eq!(tx.txid(), tx.wtxid());
    }

    #[test]
    fn legacy_round_trip() {
        let tx = simple_tx();
        let bytes = tx.serialize();
        let parsed = Transaction::parse(&bytes).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(bytes.len(), tx.total_size());
        assert_eq!(tx.base_size(), tx.total_size());
    }

    #[test]
    fn segwit_round_trip() {
        let tx = segwit_tx();
        let bytes = tx.serialize();
        // Marker and flag land right after the version.
        assert_eq!(bytes[4], 0x00);
        assert_eq!(bytes[5], 0x01);
        let parsed = Transaction::parse(&bytes).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(bytes.len(), tx.total_size());
        assert!(tx.base_size() < tx.total_size());
    }

    #[test]
    fn segwit_ids_differ() {
        let tx = segwit_tx();
        assert_ne!(tx.txid(), tx.wtxid());
        // The txid ignores the witness entirely.
        let stripped = Transaction::parse(&tx.serialize_without_witness()).unwrap();
        assert_eq!(stripped.txid(), tx.txid());
    }

    #[test]
    fn bad_segwit_flag_rejected() {
        let mut bytes = segwit_tx().serialize();
        bytes[5] = 0x02;
        assert!(matches!(
            Transaction::parse(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = simple_tx().serialize();
        bytes.push(0);
        assert!(Transaction::parse(&bytes).is_err());
    }

    #[test]
    fn weight_and_vsize() {
        let tx = simple_tx();
        assert_eq!(tx.weight(), tx.base_size() * 4);
        assert_eq!(tx.vsize(), tx.base_size());

        let tx = segwit_tx();
        assert_eq!(tx.weight(), tx.base_size() * 3 + tx.total_size());
    }

    #[test]
    fn coinbase_detection() {
        let coinbase = Transaction::coinbase(vec![0x01, 0x00], vec![]);
        assert!(coinbase.is_coinbase());
        assert!(!simple_tx().is_coinbase());

        // Wrong index on a zero hash is not a coinbase.
        let almost = Transaction::new(
            1,
            vec![TxIn {
                outpoint: OutPoint {
                    hash: Hash256::ZERO,
                    index: 0,
                },
                script_sig: vec![],
                sequence: 0xffff_ffff,
                witness: Witness::empty(),
            }],
            vec![],
            0,
        );
        assert!(!almost.is_coinbase());
    }

    #[test]
    fn coinbase_height_check() {
        let script = script::encode_coinbase_height(227_836);
        let coinbase = Transaction::coinbase(script, vec![]);
        assert!(coinbase.check_coinbase_height(227_836).is_ok());
        assert_eq!(
            coinbase.check_coinbase_height(227_837),
            Err(VerificationError::BadCoinbaseHeight { expected: 227_837 })
        );
    }

    #[test]
    fn witness_commitment_found_in_last_matching_output() {
        let mut commit_script = vec![0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];
        commit_script.extend_from_slice(&[3u8; 32]);
        let coinbase = Transaction::coinbase(
            vec![0x00],
            vec![
                TxOut {
                    value: 0,
                    script_pub_key: vec![0x51],
                },
                TxOut {
                    value: 0,
                    script_pub_key: commit_script,
                },
            ],
        );
        assert_eq!(
            coinbase.find_witness_commitment().unwrap().as_bytes(),
            &[3u8; 32]
        );
        assert!(simple_tx().find_witness_commitment().is_none());
    }

    #[test]
    fn structural_rules() {
        // The block-1 coinbase is perfectly well formed.
        let bytes = hex::decode(BLOCK1_COINBASE).unwrap();
        Transaction::parse(&bytes).unwrap().verify_structure().unwrap();

        // No outputs.
        let bare = Transaction::coinbase(vec![0x01, 0x02], vec![]);
        assert!(matches!(
            bare.verify_structure(),
            Err(VerificationError::BadTransaction(_))
        ));

        // Coinbase script too short.
        let stubby = Transaction::coinbase(
            vec![0x01],
            vec![TxOut {
                value: 1,
                script_pub_key: vec![0x51],
            }],
        );
        assert!(stubby.verify_structure().is_err());

        // Duplicate outpoint.
        let tx = simple_tx();
        let doubled = Transaction::new(
            tx.version(),
            vec![tx.inputs()[0].clone(), tx.inputs()[0].clone()],
            tx.outputs().to_vec(),
            tx.lock_time(),
        );
        assert!(doubled.verify_structure().is_err());

        // Output value beyond the coin supply.
        let rich = Transaction::new(
            tx.version(),
            tx.inputs().to_vec(),
            vec![TxOut {
                value: MAX_MONEY + 1,
                script_pub_key: vec![],
            }],
            tx.lock_time(),
        );
        assert!(rich.verify_structure().is_err());

        // A null outpoint outside a coinbase.
        let sneaky = Transaction::new(
            1,
            vec![
                TxIn {
                    outpoint: OutPoint::NULL,
                    script_sig: vec![],
                    sequence: 0,
                    witness: Witness::empty(),
                },
                tx.inputs()[0].clone(),
            ],
            tx.outputs().to_vec(),
            0,
        );
        assert!(sneaky.verify_structure().is_err());

        simple_tx().verify_structure().unwrap();
    }

    #[test]
    fn sigop_sum_spans_inputs_and_outputs() {
        let tx = Transaction::new(
            1,
            vec![TxIn {
                outpoint: OutPoint::NULL,
                script_sig: vec![script::OP_CHECKSIG],
                sequence: 0,
                witness: Witness::empty(),
            }],
            vec![TxOut {
                value: 0,
                script_pub_key: vec![script::OP_CHECKMULTISIG],
            }],
            0,
        );
        assert_eq!(tx.sig_op_count(), 21);
    }
}
