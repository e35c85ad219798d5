//! Merkle tree construction over transaction hashes.
//!
//! The root commits to the ordered transaction list:
//!
//! ```text
//!         root
//!        /    \
//!       A      B
//!      / \    / \
//!    t1  t2  t3  t3
//! ```
//!
//! Interior nodes are the double SHA-256 of the two children's natural
//! bytes concatenated. An odd level duplicates its last node, so a
//! three-leaf tree pairs `t3` with itself.

use spv_primitives::{dsha256_concat, Hash256};

/// Compute the Merkle root of ordered leaf hashes.
///
/// An empty slice yields the zero hash; callers reject empty blocks
/// before committing to a root.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }
    let mut level: Vec<Hash256> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(dsha256_concat(left.as_bytes(), right.as_bytes()));
        }
        level = next;
    }
    level[0]
}
