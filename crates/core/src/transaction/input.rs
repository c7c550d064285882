//! Transaction input: a reference to an unspent output.

use crate::UInt256;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};

/// A coin reference `(prev_tx_hash, prev_index)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Input {
    /// Hash of the transaction holding the spent output.
    pub prev_hash: UInt256,
    /// Index of the output within that transaction.
    pub prev_index: u16,
}

impl Input {
    /// Creates an input referencing the given output.
    pub fn new(prev_hash: UInt256, prev_index: u16) -> Self {
        Input {
            prev_hash,
            prev_index,
        }
    }
}

impl Serializable for Input {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.prev_hash);
        writer.write_u16(self.prev_index);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(Input {
            prev_hash: reader.read_serializable()?,
            prev_index: reader.read_u16()?,
        })
    }

    fn size(&self) -> usize {
        UInt256::SIZE + 2
    }
}
