//! Binary writer over a growable buffer.

use crate::Serializable;
use bytes::{BufMut, BytesMut};

/// Writes little-endian binary data into an in-memory buffer.
///
/// Writes are infallible; the buffer grows as needed. Callers take the
/// finished bytes with [`BinaryWriter::into_bytes`].
pub struct BinaryWriter {
    buffer: BytesMut,
}

impl BinaryWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Creates a writer with pre-reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.put_u64_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.put_i64_le(value);
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buffer.put_slice(value);
    }

    /// Writes a variable-length unsigned integer.
    ///
    /// One byte below 0xFD, otherwise a 0xFD/0xFE/0xFF marker followed by
    /// the value as u16/u32/u64.
    pub fn write_var_uint(&mut self, value: u64) {
        if value < 0xfd {
            self.write_u8(value as u8);
        } else if value <= 0xffff {
            self.write_u8(0xfd);
            self.write_u16(value as u16);
        } else if value <= 0xffff_ffff {
            self.write_u8(0xfe);
            self.write_u32(value as u32);
        } else {
            self.write_u8(0xff);
            self.write_u64(value);
        }
    }

    /// Writes a length-prefixed byte string.
    pub fn write_var_bytes(&mut self, value: &[u8]) {
        self.write_var_uint(value.len() as u64);
        self.write_bytes(value);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_var_string(&mut self, value: &str) {
        self.write_var_bytes(value.as_bytes());
    }

    /// Writes one serializable value.
    pub fn write_serializable<T: Serializable>(&mut self, value: &T) {
        value.serialize(self);
    }

    /// Writes a count-prefixed list of serializable values.
    pub fn write_serializable_list<T: Serializable>(&mut self, values: &[T]) {
        self.write_var_uint(values.len() as u64);
        for item in values {
            item.serialize(self);
        }
    }

    /// Consumes the writer, returning the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Copies the written bytes out without consuming the writer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_uint_widths() {
        let mut w = BinaryWriter::new();
        w.write_var_uint(0xfc);
        assert_eq!(w.to_bytes(), vec![0xfc]);

        let mut w = BinaryWriter::new();
        w.write_var_uint(0xfd);
        assert_eq!(w.to_bytes(), vec![0xfd, 0xfd, 0x00]);

        let mut w = BinaryWriter::new();
        w.write_var_uint(0x10000);
        assert_eq!(w.to_bytes(), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);

        let mut w = BinaryWriter::new();
        w.write_var_uint(0x1_0000_0000);
        assert_eq!(w.to_bytes()[0], 0xff);
        assert_eq!(w.len(), 9);
    }

    #[test]
    fn little_endian_ints() {
        let mut w = BinaryWriter::new();
        w.write_u32(0x12345678);
        assert_eq!(w.to_bytes(), vec![0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn var_bytes_prefix() {
        let mut w = BinaryWriter::new();
        w.write_var_bytes(b"abc");
        assert_eq!(w.to_bytes(), vec![3, b'a', b'b', b'c']);
    }
}
