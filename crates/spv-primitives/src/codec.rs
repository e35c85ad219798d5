//! Little-endian byte codec with Bitcoin's variable-length integers.
//!
//! The reader is positional over a borrowed slice; the writer appends to
//! an owned buffer. VarInts are written in their shortest form. Reading
//! accepts over-long encodings unless the canonical variant is used,
//! matching consensus behavior on the network path while letting callers
//! opt into strictness.

use crate::{CodecError, CodecResult, Hash256};

/// Number of bytes the shortest VarInt encoding of `value` occupies.
pub fn var_int_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Positional reader over a byte slice.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the reader is exhausted.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> CodecResult<u8> {
        self.buf.get(self.pos).copied().ok_or(CodecError::Truncated {
            needed: 1,
            remaining: 0,
        })
    }

    /// Look at the byte `offset` positions ahead without consuming.
    pub fn peek_at(&self, offset: usize) -> CodecResult<u8> {
        self.buf
            .get(self.pos + offset)
            .copied()
            .ok_or(CodecError::Truncated {
                needed: offset + 1 - self.remaining(),
                remaining: self.remaining(),
            })
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> CodecResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> CodecResult<u64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    /// Read 32 bytes as a natural-order hash.
    pub fn read_hash(&mut self) -> CodecResult<Hash256> {
        Hash256::from_slice(self.take(32)?)
    }

    /// Read a VarInt, accepting over-long encodings.
    pub fn read_var_int(&mut self) -> CodecResult<u64> {
        let first = self.read_u8()?;
        match first {
            0xfd => Ok(self.read_u16()? as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            _ => Ok(first as u64),
        }
    }

    /// Read a VarInt and reject non-shortest encodings.
    pub fn read_var_int_canonical(&mut self) -> CodecResult<u64> {
        let first = self.peek_u8()?;
        let value = self.read_var_int()?;
        let canonical = match first {
            0xfd => value >= 0xfd && value <= 0xffff,
            0xfe => value > 0xffff && value <= 0xffff_ffff,
            0xff => value > 0xffff_ffff,
            _ => true,
        };
        if !canonical {
            return Err(CodecError::NonCanonicalVarInt(value));
        }
        Ok(value)
    }

    /// Read a VarInt length prefix followed by that many bytes.
    pub fn read_var_bytes(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_var_int()?;
        if len > self.remaining() as u64 {
            return Err(CodecError::Truncated {
                needed: len as usize - self.remaining(),
                remaining: self.remaining(),
            });
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

/// Append-only writer producing wire-format bytes.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter { buf: Vec::new() }
    }

    /// Pre-size the underlying buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        ByteWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a hash in natural order.
    pub fn put_hash(&mut self, hash: &Hash256) {
        self.buf.extend_from_slice(hash.as_bytes());
    }

    /// Write a VarInt in its shortest form.
    pub fn put_var_int(&mut self, value: u64) {
        match value {
            0..=0xfc => self.put_u8(value as u8),
            0xfd..=0xffff => {
                self.put_u8(0xfd);
                self.put_u16(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.put_u8(0xfe);
                self.put_u32(value as u32);
            }
            _ => {
                self.put_u8(0xff);
                self.put_u64(value);
            }
        }
    }

    /// Write a length-prefixed byte slice.
    pub fn put_var_bytes(&mut self, bytes: &[u8]) {
        self.put_var_int(bytes.len() as u64);
        self.put_slice(bytes);
    }

    /// Consume the writer, yielding the buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Borrow the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}
