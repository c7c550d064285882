//! 32-byte transaction/block hash.

use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 256-bit hash value.
///
/// Little-endian on the wire, big-endian in display form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UInt256(pub [u8; 32]);

impl UInt256 {
    /// Length of the value in bytes.
    pub const SIZE: usize = 32;

    /// The all-zero value.
    pub fn zero() -> Self {
        UInt256([0u8; 32])
    }

    /// Builds a value from exactly 32 bytes (little-endian order).
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| crate::Error::format("UInt256", format!("need 32 bytes, got {}", data.len())))?;
        Ok(UInt256(bytes))
    }

    /// Double SHA-256 of the given bytes, as a hash value.
    pub fn hash(data: &[u8]) -> Self {
        UInt256(neo2_crypto::double_sha256(data))
    }

    /// The little-endian byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bytes in display (big-endian) order.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// Whether this is the all-zero value.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Serializable for UInt256 {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.0);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(UInt256(reader.read_array::<32>()?))
    }

    fn size(&self) -> usize {
        Self::SIZE
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl FromStr for UInt256 {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = hex::decode(s)
            .map_err(|e| crate::Error::format("UInt256", e.to_string()))?;
        bytes.reverse();
        Self::from_bytes(&bytes)
    }
}

impl From<[u8; 32]> for UInt256 {
    fn from(bytes: [u8; 32]) -> Self {
        UInt256(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_round_trip() {
        let value = UInt256::hash(b"block");
        assert_eq!(value.to_string().parse::<UInt256>().unwrap(), value);
    }

    #[test]
    fn hash_is_double_sha() {
        assert_eq!(UInt256::hash(b"x").0, neo2_crypto::double_sha256(b"x"));
    }

    #[test]
    fn display_is_reversed_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        let value = UInt256(bytes);
        // LE byte 0 shows up last in the BE display string.
        assert!(value.to_string().ends_with("01"));
    }
}
