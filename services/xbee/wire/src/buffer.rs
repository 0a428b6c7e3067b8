//! Bounds-checked read and write cursors.
//!
//! Every accessor checks the remaining length first and reports
//! [`WireError::Overrun`] instead of panicking, so a short or corrupted frame
//! surfaces as an error value at the exact field that was missing.

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Read cursor over an owned, immutable byte buffer
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    buf: Bytes,
    pos: usize,
}

impl ReadBuffer {
    /// Create a cursor positioned at the start of `buf`
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a cursor over a copy of `data`
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the cursor reached the end
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, need: usize) -> Result<(), WireError> {
        if self.remaining() < need {
            return Err(WireError::Overrun {
                need,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn window(&self, len: usize) -> &[u8] {
        &self.buf[self.pos..self.pos + len]
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.ensure(1)?;
        let value = self.buf[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.ensure(2)?;
        let value = self.window(2).get_u16();
        self.pos += 2;
        Ok(value)
    }

    /// Read a big-endian u32
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.ensure(4)?;
        let value = self.window(4).get_u32();
        self.pos += 4;
        Ok(value)
    }

    /// Read a big-endian u64
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.ensure(8)?;
        let value = self.window(8).get_u64();
        self.pos += 8;
        Ok(value)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(self.window(N));
        self.pos += N;
        Ok(out)
    }

    /// Read a NUL-terminated string; the terminator is consumed but not returned
    pub fn read_cstr(&mut self) -> Result<String, WireError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(WireError::Overrun {
                need: rest.len() + 1,
                remaining: rest.len(),
            })?;
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(text)
    }

    /// Take everything that is left
    pub fn read_rest(&mut self) -> Bytes {
        let out = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        out
    }
}

/// Write cursor with a hard capacity limit
#[derive(Debug)]
pub struct WriteBuffer {
    buf: BytesMut,
    limit: usize,
}

impl WriteBuffer {
    /// Create a write buffer that refuses to grow beyond `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(256)),
            limit,
        }
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can still be written
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    fn ensure(&self, need: usize) -> Result<(), WireError> {
        if self.remaining() < need {
            return Err(WireError::Overrun {
                need,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Write one byte
    pub fn put_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.ensure(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    /// Write a big-endian u16
    pub fn put_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.ensure(2)?;
        self.buf.put_u16(value);
        Ok(())
    }

    /// Write a big-endian u64
    pub fn put_u64(&mut self, value: u64) -> Result<(), WireError> {
        self.ensure(8)?;
        self.buf.put_u64(value);
        Ok(())
    }

    /// Write raw bytes
    pub fn put_slice(&mut self, data: &[u8]) -> Result<(), WireError> {
        self.ensure(data.len())?;
        self.buf.put_slice(data);
        Ok(())
    }

    /// Finish writing and return the bytes
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
