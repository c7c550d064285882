//! Transaction attributes.

use neo2_io::{BinaryWriter, Error as IoError, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};

const MAX_ATTRIBUTE_DATA: usize = 65535;
const MAX_DESCRIPTION_URL: usize = 255;

/// Attribute usage discriminator.
///
/// The usage determines how the data field is encoded: fixed 32 bytes for
/// hashes, fixed 20 for `Script`, a length byte for `DescriptionUrl` and a
/// var-length prefix for the free-form usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttributeUsage {
    ContractHash = 0x00,
    Script = 0x20,
    Vote = 0x30,
    DescriptionUrl = 0x81,
    Description = 0x90,
    Remark = 0xf0,
}

impl AttributeUsage {
    /// Parses a usage byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::ContractHash),
            0x20 => Some(Self::Script),
            0x30 => Some(Self::Vote),
            0x81 => Some(Self::DescriptionUrl),
            0x90 => Some(Self::Description),
            0xf0 => Some(Self::Remark),
            _ => None,
        }
    }
}

/// A `(usage, data)` attribute attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub usage: AttributeUsage,
    pub data: Vec<u8>,
}

impl Attribute {
    /// Creates an attribute.
    pub fn new(usage: AttributeUsage, data: Vec<u8>) -> Self {
        Attribute { usage, data }
    }
}

impl Serializable for Attribute {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.usage as u8);
        match self.usage {
            AttributeUsage::ContractHash | AttributeUsage::Vote | AttributeUsage::Script => {
                writer.write_bytes(&self.data);
            }
            AttributeUsage::DescriptionUrl => {
                writer.write_u8(self.data.len() as u8);
                writer.write_bytes(&self.data);
            }
            AttributeUsage::Description | AttributeUsage::Remark => {
                writer.write_var_bytes(&self.data);
            }
        }
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let usage_byte = reader.read_u8()?;
        let usage = AttributeUsage::from_byte(usage_byte).ok_or_else(|| {
            IoError::decoding("attribute", format!("unknown usage {usage_byte:#04x}"))
        })?;
        let data = match usage {
            AttributeUsage::ContractHash | AttributeUsage::Vote => reader.read_bytes(32)?,
            AttributeUsage::Script => reader.read_bytes(20)?,
            AttributeUsage::DescriptionUrl => {
                let len = reader.read_u8()? as usize;
                if len > MAX_DESCRIPTION_URL {
                    return Err(IoError::decoding("attribute", "url too long"));
                }
                reader.read_bytes(len)?
            }
            AttributeUsage::Description | AttributeUsage::Remark => {
                reader.read_var_bytes(MAX_ATTRIBUTE_DATA)?
            }
        };
        Ok(Attribute { usage, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_attribute_is_fixed_width() {
        let attr = Attribute::new(AttributeUsage::Script, vec![7u8; 20]);
        let bytes = neo2_io::to_bytes(&attr);
        assert_eq!(bytes.len(), 21);
        assert_eq!(neo2_io::from_bytes::<Attribute>(&bytes).unwrap(), attr);
    }

    #[test]
    fn remark_round_trip() {
        let attr = Attribute::new(AttributeUsage::Remark, b"note".to_vec());
        let bytes = neo2_io::to_bytes(&attr);
        assert_eq!(neo2_io::from_bytes::<Attribute>(&bytes).unwrap(), attr);
    }

    #[test]
    fn unknown_usage_rejected() {
        assert!(neo2_io::from_bytes::<Attribute>(&[0x77]).is_err());
    }
}
