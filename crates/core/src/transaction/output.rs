//! Transaction output: an asset amount locked to a script hash.

use crate::{Fixed8, UInt160, UInt256};
use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};

/// One spendable coin `(asset_id, amount, script_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Hash of the asset's register transaction.
    pub asset_id: UInt256,
    /// Amount carried by this output.
    pub amount: Fixed8,
    /// Owner script hash.
    pub script_hash: UInt160,
}

impl Output {
    /// Creates an output.
    pub fn new(asset_id: UInt256, amount: Fixed8, script_hash: UInt160) -> Self {
        Output {
            asset_id,
            amount,
            script_hash,
        }
    }
}

impl Serializable for Output {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.asset_id);
        writer.write_serializable(&self.amount);
        writer.write_serializable(&self.script_hash);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(Output {
            asset_id: reader.read_serializable()?,
            amount: reader.read_serializable()?,
            script_hash: reader.read_serializable()?,
        })
    }

    fn size(&self) -> usize {
        UInt256::SIZE + 8 + UInt160::SIZE
    }
}
