//! Witness: the invocation/verification script pair.

use crate::UInt160;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};

const MAX_SCRIPT_SIZE: usize = 65536;

/// A pair of scripts authorizing a transaction or block.
///
/// The invocation script pushes signatures; the verification script consumes
/// them and must leave a truthy value on the stack. The witness is identified
/// by the hash of its verification script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub invocation_script: Vec<u8>,
    pub verification_script: Vec<u8>,
}

impl Witness {
    /// Creates a witness from both scripts.
    pub fn new(invocation_script: Vec<u8>, verification_script: Vec<u8>) -> Self {
        Witness {
            invocation_script,
            verification_script,
        }
    }

    /// Hash of the verification script; the witness owner.
    pub fn script_hash(&self) -> UInt160 {
        UInt160::from_script(&self.verification_script)
    }
}

impl Serializable for Witness {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.invocation_script);
        writer.write_var_bytes(&self.verification_script);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(Witness {
            invocation_script: reader.read_var_bytes(MAX_SCRIPT_SIZE)?,
            verification_script: reader.read_var_bytes(MAX_SCRIPT_SIZE)?,
        })
    }
}
