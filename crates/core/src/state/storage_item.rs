//! Contract storage entries.

use neo2_io::{BinaryWriter, MemoryReader, Serializable};

const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// One value in a contract's keyed storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageItem {
    pub value: Vec<u8>,
    /// Constant items cannot be overwritten or deleted.
    pub is_const: bool,
}

impl StorageItem {
    /// Creates a mutable storage item.
    pub fn new(value: Vec<u8>) -> Self {
        StorageItem {
            value,
            is_const: false,
        }
    }
}

impl Serializable for StorageItem {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.value);
        writer.write_bool(self.is_const);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(StorageItem {
            value: reader.read_var_bytes(MAX_VALUE_SIZE)?,
            is_const: reader.read_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let item = StorageItem {
            value: b"v".to_vec(),
            is_const: true,
        };
        let bytes = neo2_io::to_bytes(&item);
        assert_eq!(neo2_io::from_bytes::<StorageItem>(&bytes).unwrap(), item);
    }
}
