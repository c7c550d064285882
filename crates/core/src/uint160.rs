//! 20-byte script hash.

use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 160-bit value identifying a script (contract or witness owner).
///
/// Stored and transmitted little-endian; displayed big-endian with an `0x`
/// prefix, matching explorer conventions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UInt160(pub [u8; 20]);

impl UInt160 {
    /// Length of the value in bytes.
    pub const SIZE: usize = 20;

    /// The all-zero value.
    pub fn zero() -> Self {
        UInt160([0u8; 20])
    }

    /// Builds a value from exactly 20 bytes (little-endian order).
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        let bytes: [u8; 20] = data
            .try_into()
            .map_err(|_| crate::Error::format("UInt160", format!("need 20 bytes, got {}", data.len())))?;
        Ok(UInt160(bytes))
    }

    /// Script hash of the given script bytes (RIPEMD-160 of SHA-256).
    pub fn from_script(script: &[u8]) -> Self {
        UInt160(neo2_crypto::hash160(script))
    }

    /// The little-endian byte representation.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Bytes in display (big-endian) order.
    pub fn to_be_bytes(&self) -> [u8; 20] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// Whether this is the all-zero value.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Serializable for UInt160 {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.0);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(UInt160(reader.read_array::<20>()?))
    }

    fn size(&self) -> usize {
        Self::SIZE
    }
}

impl fmt::Display for UInt160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl FromStr for UInt160 {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = hex::decode(s)
            .map_err(|e| crate::Error::format("UInt160", e.to_string()))?;
        bytes.reverse();
        Self::from_bytes(&bytes)
    }
}

impl From<[u8; 20]> for UInt160 {
    fn from(bytes: [u8; 20]) -> Self {
        UInt160(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_round_trip() {
        let value = UInt160([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
        ]);
        let text = value.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.parse::<UInt160>().unwrap(), value);
    }

    #[test]
    fn wire_round_trip() {
        let value = UInt160([0xab; 20]);
        let bytes = neo2_io::to_bytes(&value);
        assert_eq!(bytes.len(), UInt160::SIZE);
        assert_eq!(neo2_io::from_bytes::<UInt160>(&bytes).unwrap(), value);
    }

    #[test]
    fn from_script_hashes() {
        let script = [0x51u8, 0x66]; // PUSH1 RET
        let expected = neo2_crypto::hash160(&script);
        assert_eq!(UInt160::from_script(&script).0, expected);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(UInt160::from_bytes(&[0u8; 19]).is_err());
    }
}
