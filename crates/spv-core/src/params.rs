//! Network parameters, the injectable clock, and the validation policy.
//!
//! Everything verification needs from its environment arrives through
//! these types: no ambient context, no process-wide flags. The genesis
//! blocks are built from first principles (the Times headline coinbase)
//! so the Merkle root and hash come out of the same code paths every
//! other block uses.

use crate::block::{Block, Header, BLOCK_VERSION_GENESIS};
use crate::merkle::merkle_root;
use crate::script;
use crate::stored_block::StoredBlock;
use crate::transaction::{Transaction, TxOut};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use spv_primitives::{CodecResult, CompactTarget, Hash256, EASIEST_TARGET, STANDARD_MAX_TARGET};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" for timestamp checks. Injectable so tests can pin
/// the clock.
pub trait Clock: Send + Sync {
    /// Current time as Unix seconds.
    fn now(&self) -> u32;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// A clock frozen at a fixed instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.0
    }
}

/// Per-transaction script and signature validation, implemented by an
/// outer layer. The header chain only checks transaction *structure*;
/// anything that needs the UTXO set or a script interpreter comes in
/// through this seam.
pub trait ScriptVerifier: Send + Sync {
    /// Validate one transaction at the given height.
    fn verify_transaction(
        &self,
        tx: &Transaction,
        height: u32,
    ) -> crate::error::VerifyResult<()>;
}

/// Everything a verify call may consult about its environment.
///
/// Replaces any notion of process-wide validation state: callers that
/// want relaxed proof-of-work (test chains with unsolved headers) say so
/// here, explicitly, per call site.
#[derive(Clone)]
pub struct ValidationPolicy {
    /// Skip the proof-of-work check. Test harness use only.
    pub relax_pow: bool,
    /// Source of the current time for drift checks.
    pub clock: Arc<dyn Clock>,
}

impl ValidationPolicy {
    /// Full consensus rules against the system clock.
    pub fn strict() -> Self {
        ValidationPolicy {
            relax_pow: false,
            clock: Arc::new(SystemClock),
        }
    }

    /// Rules with the proof-of-work check disabled.
    pub fn relaxed() -> Self {
        ValidationPolicy {
            relax_pow: true,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

impl fmt::Debug for ValidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationPolicy")
            .field("relax_pow", &self.relax_pow)
            .finish_non_exhaustive()
    }
}

/// The supported networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Stable identifier, used to locate per-network resources such as
    /// checkpoint files.
    pub fn id(&self) -> &'static str {
        match self {
            Network::Mainnet => "org.bitcoin.production",
            Network::Testnet => "org.bitcoin.test",
            Network::Regtest => "org.bitcoin.regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Expected seconds between blocks.
pub const TARGET_SPACING_SECS: u32 = 10 * 60;
/// Length of one difficulty window: two weeks.
pub const TARGET_TIMESPAN_SECS: u32 = 14 * 24 * 60 * 60;
/// Blocks per difficulty window.
pub const RETARGET_INTERVAL: u32 = TARGET_TIMESPAN_SECS / TARGET_SPACING_SECS;

/// Consensus parameters of one network.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    network: Network,
    max_target: CompactTarget,
    retarget_interval: u32,
    target_timespan_secs: u32,
    target_spacing_secs: u32,
    allow_min_difficulty_blocks: bool,
    genesis: Block,
}

impl NetworkParams {
    /// The production network.
    pub fn mainnet() -> Self {
        NetworkParams {
            network: Network::Mainnet,
            max_target: STANDARD_MAX_TARGET,
            retarget_interval: RETARGET_INTERVAL,
            target_timespan_secs: TARGET_TIMESPAN_SECS,
            target_spacing_secs: TARGET_SPACING_SECS,
            allow_min_difficulty_blocks: false,
            genesis: MAINNET_GENESIS.clone(),
        }
    }

    /// The public test network (testnet3 rules, including the 20-minute
    /// minimum-difficulty exception).
    pub fn testnet() -> Self {
        NetworkParams {
            network: Network::Testnet,
            max_target: STANDARD_MAX_TARGET,
            retarget_interval: RETARGET_INTERVAL,
            target_timespan_secs: TARGET_TIMESPAN_SECS,
            target_spacing_secs: TARGET_SPACING_SECS,
            allow_min_difficulty_blocks: true,
            genesis: TESTNET_GENESIS.clone(),
        }
    }

    /// Local regression-test network: easiest possible difficulty, no
    /// retargeting pressure.
    pub fn regtest() -> Self {
        NetworkParams {
            network: Network::Regtest,
            max_target: EASIEST_TARGET,
            retarget_interval: RETARGET_INTERVAL,
            target_timespan_secs: TARGET_TIMESPAN_SECS,
            target_spacing_secs: TARGET_SPACING_SECS,
            allow_min_difficulty_blocks: true,
            genesis: REGTEST_GENESIS.clone(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Stable network identifier.
    pub fn id(&self) -> &'static str {
        self.network.id()
    }

    /// The easiest target this network accepts.
    pub fn max_target(&self) -> CompactTarget {
        self.max_target
    }

    /// Blocks between difficulty retargets.
    pub fn retarget_interval(&self) -> u32 {
        self.retarget_interval
    }

    /// Intended wall-clock length of one difficulty window, seconds.
    pub fn target_timespan_secs(&self) -> u32 {
        self.target_timespan_secs
    }

    /// Intended seconds between consecutive blocks.
    pub fn target_spacing_secs(&self) -> u32 {
        self.target_spacing_secs
    }

    /// Whether the 20-minute minimum-difficulty rule applies.
    pub fn allow_min_difficulty_blocks(&self) -> bool {
        self.allow_min_difficulty_blocks
    }

    /// The genesis block, with its coinbase body.
    pub fn genesis_block(&self) -> &Block {
        &self.genesis
    }

    /// The genesis header.
    pub fn genesis_header(&self) -> Header {
        self.genesis.as_header()
    }

    /// The genesis block wrapped as a stored block at height zero.
    pub fn genesis_stored(&self) -> CodecResult<StoredBlock> {
        let header = self.genesis.as_header();
        let work = header.work()?;
        Ok(StoredBlock::new(header, work, 0))
    }

    /// Default file name of this network's checkpoint resource.
    pub fn checkpoint_file_name(&self) -> String {
        format!("{}.checkpoints.txt", self.id())
    }
}

/// The headline buried in the genesis coinbase.
const GENESIS_MESSAGE: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Uncompressed public key paid by the genesis output.
const GENESIS_OUTPUT_PUBKEY: &str = "04678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5f";

/// One genesis coinbase is shared by every network; only the header
/// fields differ.
static MAINNET_GENESIS: Lazy<Block> =
    Lazy::new(|| build_genesis(1_231_006_505, STANDARD_MAX_TARGET, 2_083_236_893));
static TESTNET_GENESIS: Lazy<Block> =
    Lazy::new(|| build_genesis(1_296_688_602, STANDARD_MAX_TARGET, 414_098_458));
static REGTEST_GENESIS: Lazy<Block> = Lazy::new(|| build_genesis(1_296_688_602, EASIEST_TARGET, 2));

/// Minimal little-endian script-number bytes of `value`.
fn script_num_bytes(value: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut v = value;
    while v > 0 {
        bytes.push((v & 0xff) as u8);
        v >>= 8;
    }
    if bytes.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        bytes.push(0);
    }
    bytes
}

fn build_genesis(time: u32, bits: CompactTarget, nonce: u32) -> Block {
    let mut script_sig = Vec::new();
    script::push_data(&mut script_sig, &script_num_bytes(0x1d00_ffff));
    script::push_data(&mut script_sig, &script_num_bytes(4));
    script::push_data(&mut script_sig, GENESIS_MESSAGE.as_bytes());

    let pubkey = hex::decode(GENESIS_OUTPUT_PUBKEY).expect("genesis pubkey constant");
    let coinbase = Transaction::coinbase(
        script_sig,
        vec![TxOut {
            value: 50_0000_0000,
            script_pub_key: script::p2pk(&pubkey),
        }],
    );

    let root = merkle_root(&[coinbase.txid()]);
    let header = Header::new(BLOCK_VERSION_GENESIS, Hash256::ZERO, root, time, bits, nonce);
    Block::new(header, Some(vec![coinbase]))
}
