//! Deterministic test-data generators.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use spv_chain::TEXTUAL_MAGIC;
use spv_core::{Header, NetworkParams, StoredBlock};
use spv_primitives::Hash256;

/// A child header of `parent`, repeating its difficulty. The seed
/// varies the merkle root and nonce so sibling chains diverge.
pub fn child_header(parent: &StoredBlock, seed: u32) -> Header {
    Header::new(
        1,
        parent.hash(),
        Hash256::from_bytes(seed_bytes(seed)),
        parent.header().time() + 600,
        parent.header().bits(),
        seed,
    )
}

/// A chain of `length` headers above `parent`, seeded so distinct seeds
/// give distinct chains. Returns the headers with their stored forms.
pub fn chain_above(
    parent: &StoredBlock,
    length: usize,
    seed: u32,
) -> (Vec<Header>, Vec<StoredBlock>) {
    let mut headers = Vec::with_capacity(length);
    let mut stored = Vec::with_capacity(length);
    let mut cursor = parent.clone();
    for i in 0..length {
        let header = child_header(&cursor, seed.wrapping_add(i as u32));
        cursor = cursor.build_next(header.clone()).expect("valid bits");
        headers.push(header);
        stored.push(cursor.clone());
    }
    (headers, stored)
}

/// Grind the nonce until the header meets its own target. Only sensible
/// against the easiest (regtest) difficulty, where each try is a coin
/// flip.
pub fn solve(header: &mut Header) {
    let mut nonce = header.nonce();
    while !header
        .bits()
        .is_met_by(&header.hash())
        .expect("decodable bits")
    {
        nonce = nonce.wrapping_add(1);
        header.set_nonce(nonce);
    }
}

/// Render a textual checkpoint file with no signatures.
pub fn checkpoint_file(checkpoints: &[StoredBlock]) -> String {
    let mut text = format!("{}\n0\n{}\n", TEXTUAL_MAGIC, checkpoints.len());
    for checkpoint in checkpoints {
        let record = checkpoint
            .serialize_compact()
            .expect("encodable checkpoint");
        text.push_str(&STANDARD_NO_PAD.encode(record));
        text.push('\n');
    }
    text
}

/// The regtest genesis as a stored block.
pub fn regtest_genesis() -> StoredBlock {
    NetworkParams::regtest()
        .genesis_stored()
        .expect("genesis parameters")
}

fn seed_bytes(seed: u32) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&seed.to_le_bytes());
    bytes[31] = (seed % 251) as u8;
    bytes
}
