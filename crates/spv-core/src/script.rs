//! Minimal script handling for header-chain validation.
//!
//! The SPV layer never executes scripts; it only needs to count signature
//! operations, build and check the BIP-34 height push in coinbase scripts,
//! construct the genesis outputs, and spot the segwit commitment output.
//! Full script interpretation lives with the external verifier.

use spv_primitives::Hash256;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Magic bytes of the segwit commitment output:
/// `OP_RETURN PUSH36 0xaa21a9ed`.
const WITNESS_COMMITMENT_HEADER: [u8; 6] = [OP_RETURN, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Count legacy signature operations in a script.
///
/// CHECKSIG-class opcodes count 1, CHECKMULTISIG-class count 20
/// regardless of the actual key count. Counting stops quietly at a
/// truncated push, matching the reference behavior for unparseable
/// scripts.
pub fn sig_op_count(script: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < script.len() {
        let op = script[i];
        i += 1;
        match op {
            0x01..=0x4b => i += op as usize,
            OP_PUSHDATA1 => {
                if i >= script.len() {
                    break;
                }
                i += 1 + script[i] as usize;
            }
            OP_PUSHDATA2 => {
                if i + 1 >= script.len() {
                    break;
                }
                i += 2 + u16::from_le_bytes([script[i], script[i + 1]]) as usize;
            }
            OP_PUSHDATA4 => {
                if i + 3 >= script.len() {
                    break;
                }
                let len =
                    u32::from_le_bytes([script[i], script[i + 1], script[i + 2], script[i + 3]]);
                i += 4 + len as usize;
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => count += 20,
            _ => {}
        }
    }
    count
}

/// Append a minimal push of `data` to `script`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Append a minimal push of a script number (little-endian, sign-byte
/// padded when the top bit is set).
pub fn push_num(script: &mut Vec<u8>, value: u64) {
    if value == 0 {
        script.push(OP_0);
        return;
    }
    if value <= 16 {
        script.push(OP_1 + (value - 1) as u8);
        return;
    }
    let mut bytes = Vec::new();
    let mut v = value;
    while v > 0 {
        bytes.push((v & 0xff) as u8);
        v >>= 8;
    }
    if bytes.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        bytes.push(0);
    }
    push_data(script, &bytes);
}

/// The script bytes a BIP-34 coinbase must begin with for `height`.
pub fn encode_coinbase_height(height: u32) -> Vec<u8> {
    let mut script = Vec::new();
    push_num(&mut script, height as u64);
    script
}

/// Build a pay-to-pubkey output script (genesis-era outputs).
pub fn p2pk(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::new();
    push_data(&mut script, pubkey);
    script.push(OP_CHECKSIG);
    script
}

/// Extract the witness commitment from a script, if this is the segwit
/// commitment output.
pub fn witness_commitment(script: &[u8]) -> Option<Hash256> {
    if script.len() >= 38 && script[..6] == WITNESS_COMMITMENT_HEADER {
        Hash256::from_slice(&script[6..38]).ok()
    } else {
        None
    }
}
