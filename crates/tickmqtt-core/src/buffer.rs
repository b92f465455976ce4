//! Fixed-capacity byte buffer with a write cursor and an independent read cursor.
//!
//! Writers append with the `put_*` family until the capacity chosen at
//! construction is reached; readers walk the written bytes sequentially with
//! the `read_*` family. `read_cursor <= len <= capacity` always holds.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{EncodeError, ProtocolError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: BytesMut,
    capacity: usize,
    read_pos: usize,
}

impl ByteBuffer {
    /// Create an empty buffer that accepts at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            read_pos: 0,
        }
    }

    /// Create a full buffer holding a copy of `bytes`, ready to be read.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            capacity: bytes.len(),
            read_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_cursor(&self) -> usize {
        self.read_pos
    }

    /// Bytes written but not yet read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Rewind the read cursor to the first byte.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Hand the written bytes over as an immutable, cheaply cloneable buffer.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    fn ensure_space(&self, needed: usize) -> std::result::Result<(), EncodeError> {
        let available = self.capacity - self.data.len();
        if needed > available {
            return Err(EncodeError::BufferFull { needed, available });
        }
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> std::result::Result<(), EncodeError> {
        self.ensure_space(1)?;
        self.data.put_u8(value);
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> std::result::Result<(), EncodeError> {
        self.ensure_space(2)?;
        self.data.put_u16(value);
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> std::result::Result<(), EncodeError> {
        self.ensure_space(4)?;
        self.data.put_u32(value);
        Ok(())
    }

    pub fn put_slice(&mut self, bytes: &[u8]) -> std::result::Result<(), EncodeError> {
        self.ensure_space(bytes.len())?;
        self.data.put_slice(bytes);
        Ok(())
    }

    fn ensure_readable(&self, needed: usize) -> Result<()> {
        let have = self.remaining();
        if needed > have {
            return Err(ProtocolError::IncompletePacket { needed, have });
        }
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure_readable(1)?;
        Ok(self.data[self.read_pos])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.read_pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure_readable(2)?;
        let p = self.read_pos;
        let val = u16::from_be_bytes([self.data[p], self.data[p + 1]]);
        self.read_pos += 2;
        Ok(val)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_readable(4)?;
        let p = self.read_pos;
        let val = u32::from_be_bytes([
            self.data[p],
            self.data[p + 1],
            self.data[p + 2],
            self.data[p + 3],
        ]);
        self.read_pos += 4;
        Ok(val)
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&[u8]> {
        self.ensure_readable(len)?;
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..start + len])
    }

    /// Read everything that is left.
    pub fn read_to_end(&mut self) -> &[u8] {
        let start = self.read_pos;
        self.read_pos = self.data.len();
        &self.data[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut buf = ByteBuffer::with_capacity(7);
        buf.put_u8(0x10).unwrap();
        buf.put_u16(0x0203).unwrap();
        buf.put_u32(0xDEADBEEF).unwrap();
        assert_eq!(buf.len(), 7);

        assert_eq!(buf.read_u8().unwrap(), 0x10);
        assert_eq!(buf.read_u16().unwrap(), 0x0203);
        assert_eq!(buf.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_capacity_is_fixed() {
        let mut buf = ByteBuffer::with_capacity(2);
        buf.put_u8(1).unwrap();
        assert_eq!(
            buf.put_u16(2),
            Err(EncodeError::BufferFull {
                needed: 2,
                available: 1
            })
        );
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = ByteBuffer::from_slice(&[1, 2, 3]);
        assert!(buf.read_u32().is_err());
        // Failed read does not move the cursor
        assert_eq!(buf.read_cursor(), 0);
        assert_eq!(buf.read_slice(3).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_move_leaves_default() {
        let mut buf = ByteBuffer::from_slice(b"abc");
        let taken = std::mem::take(&mut buf);
        assert_eq!(taken.as_slice(), b"abc");
        assert_eq!(buf.capacity(), 0);
        assert!(buf.is_empty());
    }
}
