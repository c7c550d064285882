//! Deployed contract state.

use crate::UInt160;
use bitflags::bitflags;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};

const MAX_SCRIPT_SIZE: usize = 1024 * 1024;
const MAX_TEXT: usize = 65535;

bitflags! {
    /// Capability flags declared at deployment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContractProperties: u8 {
        const HAS_STORAGE = 0x01;
        const HAS_DYNAMIC_INVOKE = 0x02;
        const IS_PAYABLE = 0x04;
    }
}

/// A deployed contract, keyed by the hash of its script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractState {
    pub script: Vec<u8>,
    /// One parameter-type byte per declared parameter.
    pub param_list: Vec<u8>,
    pub return_type: u8,
    pub properties: ContractProperties,
    pub name: String,
    pub code_version: String,
    pub author: String,
    pub email: String,
    pub description: String,
}

impl ContractState {
    /// The contract's identity: hash of its script.
    pub fn script_hash(&self) -> UInt160 {
        UInt160::from_script(&self.script)
    }

    /// Whether the contract may use persistent storage.
    pub fn has_storage(&self) -> bool {
        self.properties.contains(ContractProperties::HAS_STORAGE)
    }
}

impl Serializable for ContractState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.script);
        writer.write_var_bytes(&self.param_list);
        writer.write_u8(self.return_type);
        writer.write_u8(self.properties.bits());
        writer.write_var_string(&self.name);
        writer.write_var_string(&self.code_version);
        writer.write_var_string(&self.author);
        writer.write_var_string(&self.email);
        writer.write_var_string(&self.description);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(ContractState {
            script: reader.read_var_bytes(MAX_SCRIPT_SIZE)?,
            param_list: reader.read_var_bytes(255)?,
            return_type: reader.read_u8()?,
            properties: ContractProperties::from_bits_retain(reader.read_u8()?),
            name: reader.read_var_string(MAX_TEXT)?,
            code_version: reader.read_var_string(MAX_TEXT)?,
            author: reader.read_var_string(MAX_TEXT)?,
            email: reader.read_var_string(MAX_TEXT)?,
            description: reader.read_var_string(MAX_TEXT)?,
        })
    }
}
