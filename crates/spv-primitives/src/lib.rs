//! # spv-primitives
//!
//! Wire-format primitives shared by every layer of the SPV node:
//!
//! - [`Hash256`] and the double-SHA-256 used throughout Bitcoin consensus
//! - A little-endian byte codec with Bitcoin's variable-length integers
//! - The compact ("nBits") difficulty encoding and its work arithmetic
//!
//! ## Endianness
//!
//! Two conventions coexist and are easy to confuse:
//!
//! - Integers on the wire are little-endian.
//! - Hashes are kept in *natural* order (the bytes SHA-256 produced).
//!   Block explorers display them reversed; [`Hash256`]'s `Display`
//!   renders that reversed form. When a header hash is compared against
//!   a difficulty target it is interpreted as a little-endian integer
//!   of its natural bytes.

mod codec;
mod difficulty;
mod error;
mod hash;

pub use codec::{var_int_size, ByteReader, ByteWriter};
pub use difficulty::{CompactTarget, EASIEST_TARGET, STANDARD_MAX_TARGET};
pub use error::{CodecError, CodecResult};
pub use hash::{dsha256, dsha256_concat, sha256, Hash256};
