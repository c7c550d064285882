//! Binary serialization primitives for the neo2 node.
//!
//! Everything that crosses the wire or the store goes through the
//! [`BinaryWriter`] / [`MemoryReader`] pair: little-endian fixed widths,
//! variable-length integers and byte strings.

pub mod binary_writer;
pub mod memory_reader;
pub mod serializable;

pub use binary_writer::BinaryWriter;
pub use memory_reader::MemoryReader;
pub use serializable::Serializable;

/// Errors surfaced while encoding or decoding binary data.
///
/// `Decoding` failures are fatal for the item being read; the caller decides
/// whether the surrounding transport drops the peer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected end of stream: needed {needed} more byte(s)")]
    EndOfStream { needed: usize },

    #[error("malformed {what}: {reason}")]
    Decoding { what: &'static str, reason: String },

    #[error("value out of range: {0}")]
    OutOfRange(u64),
}

impl Error {
    /// Builds a `Decoding` error for the named structure.
    pub fn decoding(what: &'static str, reason: impl Into<String>) -> Self {
        Error::Decoding {
            what,
            reason: reason.into(),
        }
    }
}

/// Result alias for IO operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Serializes a value to a fresh byte vector.
pub fn to_bytes<T: Serializable>(value: &T) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    value.serialize(&mut writer);
    writer.into_bytes()
}

/// Parses a value from a byte slice, requiring the whole slice be consumed.
pub fn from_bytes<T: Serializable>(data: &[u8]) -> Result<T> {
    let mut reader = MemoryReader::new(data);
    let value = T::deserialize(&mut reader)?;
    if !reader.is_exhausted() {
        return Err(Error::decoding("trailing data", "bytes left after parse"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pair(u32, Vec<u8>);

    impl Serializable for Pair {
        fn serialize(&self, writer: &mut BinaryWriter) {
            writer.write_u32(self.0);
            writer.write_var_bytes(&self.1);
        }

        fn deserialize(reader: &mut MemoryReader) -> Result<Self> {
            let n = reader.read_u32()?;
            let b = reader.read_var_bytes(1024)?;
            Ok(Pair(n, b))
        }
    }

    #[test]
    fn round_trip_through_helpers() {
        let p = Pair(7, vec![1, 2, 3]);
        let bytes = to_bytes(&p);
        assert_eq!(from_bytes::<Pair>(&bytes).unwrap(), p);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = to_bytes(&Pair(7, vec![]));
        bytes.push(0xff);
        assert!(from_bytes::<Pair>(&bytes).is_err());
    }
}
