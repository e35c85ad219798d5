//! SHA-256 hashing and the 32-byte hash value type.

use crate::{CodecError, CodecResult};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash in *natural* byte order (as produced by SHA-256).
///
/// Explorers and RPC interfaces show block and transaction hashes
/// byte-reversed; `Display` renders that reversed form. Equality and
/// `Hash` always operate on the natural bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// The all-zero hash. Used as the previous-block reference of the
    /// genesis header and as the coinbase outpoint hash.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Wrap natural-order bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    /// Wrap a natural-order byte slice.
    pub fn from_slice(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != 32 {
            return Err(CodecError::Malformed(format!(
                "expected 32 hash bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Hash256(out))
    }

    /// Parse the reversed (display) hex form, e.g. a block hash as seen
    /// on an explorer.
    pub fn from_hex(s: &str) -> CodecResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let mut hash = Self::from_slice(&bytes)?;
        hash.0.reverse();
        Ok(hash)
    }

    /// The natural-order bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The natural-order bytes by value.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// A copy with the byte order flipped.
    pub fn reversed(&self) -> Hash256 {
        let mut out = self.0;
        out.reverse();
        Hash256(out)
    }

    /// Interpret the natural bytes as a little-endian 256-bit integer.
    ///
    /// This is the interpretation used when comparing a header hash
    /// against its difficulty target.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.reversed().0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash256(out)
}

/// Double SHA-256, the hash applied to headers and transactions.
pub fn dsha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash256(out)
}

/// Double SHA-256 over the concatenation of two buffers.
///
/// Used when pairing Merkle tree nodes without allocating.
pub fn dsha256_concat(a: &[u8], b: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    let first = hasher.finalize();
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash256(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash256::from_bytes(bytes);
        let s = hash.to_string();
        assert!(s.ends_with("ab"));
        assert!(s.starts_with("00"));
    }

    #[test]
    fn from_hex_round_trips_display() {
        let s = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
        let hash = Hash256::from_hex(s).unwrap();
        assert_eq!(hash.to_string(), s);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(Hash256::from_hex("abcd").is_err());
        assert!(Hash256::from_hex("zz").is_err());
    }

    #[test]
    fn dsha256_empty_vector() {
        // Well-known double hash of the empty string.
        let hash = dsha256(b"");
        assert_eq!(
            hex::encode(hash.as_bytes()),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn dsha256_concat_matches_buffered() {
        let a = b"hello ";
        let b = b"world";
        let mut joined = Vec::new();
        joined.extend_from_slice(a);
        joined.extend_from_slice(b);
        assert_eq!(dsha256_concat(a, b), dsha256(&joined));
    }

    #[test]
    fn biguint_interpretation_is_little_endian() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[1] = 0x02;
        let hash = Hash256::from_bytes(bytes);
        assert_eq!(hash.to_biguint(), BigUint::from(0x0201u32));
    }
}
