//! Compact ("nBits") difficulty encoding and work arithmetic.
//!
//! A compact value packs a 256-bit threshold into 32 bits as
//! `exponent || 24-bit signed mantissa`. A header is valid when its hash,
//! read as a 256-bit little-endian integer, does not exceed the decoded
//! threshold. The *work* of a header is the expected number of hash
//! attempts to find it: `2^256 / (target + 1)`.

use crate::{CodecError, CodecResult, Hash256};
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use std::fmt;

/// Highest target accepted on mainnet and testnet (`0x1d00ffff`).
pub const STANDARD_MAX_TARGET: CompactTarget = CompactTarget(0x1d00_ffff);

/// Easiest target representable under the sign-bit rules (`0x207fffff`).
/// Test networks fall back to this value under the 20-minute rule.
pub const EASIEST_TARGET: CompactTarget = CompactTarget(0x207f_ffff);

/// A difficulty target in compact form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompactTarget(u32);

impl CompactTarget {
    /// Wrap a raw compact value. No validation happens until decode.
    pub const fn new(compact: u32) -> Self {
        CompactTarget(compact)
    }

    /// The raw 32-bit compact value.
    pub const fn compact(self) -> u32 {
        self.0
    }

    /// Decode into the 256-bit threshold.
    ///
    /// Fails on negative values (mantissa sign bit with a non-zero
    /// mantissa) and on thresholds wider than 256 bits.
    pub fn to_target(self) -> CodecResult<BigUint> {
        let exponent = (self.0 >> 24) as usize;
        let mantissa = self.0 & 0x007f_ffff;
        if self.0 & 0x0080_0000 != 0 && mantissa != 0 {
            return Err(CodecError::Malformed(format!(
                "negative compact difficulty {:#010x}",
                self.0
            )));
        }
        let target = if exponent <= 3 {
            BigUint::from(mantissa >> (8 * (3 - exponent)))
        } else {
            BigUint::from(mantissa) << (8 * (exponent - 3))
        };
        if target.bits() > 256 {
            return Err(CodecError::Malformed(format!(
                "compact difficulty {:#010x} overflows 256 bits",
                self.0
            )));
        }
        Ok(target)
    }

    /// Encode a threshold into its canonical compact form.
    ///
    /// The mantissa is kept free of the sign bit by shifting into a
    /// larger exponent, as the reference implementation does.
    pub fn from_target(target: &BigUint) -> Self {
        let mut size = ((target.bits() + 7) / 8) as u32;
        let mut compact: u32 = if size <= 3 {
            let low = target.to_u64().unwrap_or(0) as u32;
            low << (8 * (3 - size))
        } else {
            (target >> (8 * (size - 3) as usize))
                .to_u32()
                .unwrap_or(0)
        };
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        CompactTarget(compact | (size << 24))
    }

    /// The work this target represents: `2^256 / (target + 1)`.
    pub fn work(self) -> CodecResult<BigUint> {
        let target = self.to_target()?;
        Ok((BigUint::one() << 256u32) / (target + BigUint::one()))
    }

    /// Whether `hash`, as a 256-bit integer, meets (is at most) this
    /// target.
    pub fn is_met_by(self, hash: &Hash256) -> CodecResult<bool> {
        Ok(hash.to_biguint() <= self.to_target()?)
    }
}

impl fmt::Display for CompactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Debug for CompactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactTarget({:#010x})", self.0)
    }
}

impl From<u32> for CompactTarget {
    fn from(compact: u32) -> Self {
        CompactTarget(compact)
    }
}
