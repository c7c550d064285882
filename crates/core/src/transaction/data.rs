//! Type-specific transaction payloads.

use crate::state::AssetType;
use crate::transaction::{Input, TransactionType};
use crate::{Error, Fixed8, Result, UInt160};
use neo2_crypto::PublicKey;
use neo2_io::{BinaryWriter, Error as IoError, MemoryReader, Serializable};
use std::collections::BTreeSet;

const MAX_CLAIMS: usize = 65535;
const MAX_SCRIPT_SIZE: usize = 65536;
const MAX_NAME: usize = 1024;
const MAX_DESCRIPTORS: usize = 16;

/// Writes a compressed public key (33 bytes).
pub(crate) fn write_public_key(writer: &mut BinaryWriter, key: &PublicKey) {
    writer.write_bytes(&key.to_bytes());
}

/// Reads a compressed public key.
pub(crate) fn read_public_key(reader: &mut MemoryReader) -> neo2_io::Result<PublicKey> {
    let prefix = reader.peek()?;
    if prefix != 0x02 && prefix != 0x03 {
        return Err(IoError::decoding(
            "public key",
            format!("unexpected prefix {prefix:#04x}"),
        ));
    }
    let bytes = reader.read_bytes(33)?;
    PublicKey::from_bytes(&bytes).map_err(|e| IoError::decoding("public key", e.to_string()))
}

/// Script hash of a single-signature contract for the key.
pub(crate) fn public_key_script_hash(key: &PublicKey) -> UInt160 {
    // PUSHBYTES33 <key> CHECKSIG
    let mut script = Vec::with_capacity(35);
    script.push(0x21);
    script.extend_from_slice(&key.to_bytes());
    script.push(0xac);
    UInt160::from_script(&script)
}

/// Target kind of a state descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StateDescriptorType {
    Account = 0x40,
    Validator = 0x48,
}

/// A single governance state change (vote or validator registration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDescriptor {
    pub descriptor_type: StateDescriptorType,
    pub key: Vec<u8>,
    pub field: String,
    pub value: Vec<u8>,
}

impl StateDescriptor {
    /// Adds the hash whose witness must authorize this descriptor.
    pub fn add_verifying_hash(&self, hashes: &mut BTreeSet<UInt160>) -> Result<()> {
        match self.descriptor_type {
            StateDescriptorType::Account => {
                hashes.insert(UInt160::from_bytes(&self.key)?);
            }
            StateDescriptorType::Validator => {
                if self.field == "Registered" {
                    let key = PublicKey::from_bytes(&self.key)
                        .map_err(|e| Error::format("state descriptor", e.to_string()))?;
                    hashes.insert(public_key_script_hash(&key));
                }
            }
        }
        Ok(())
    }
}

impl Serializable for StateDescriptor {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.descriptor_type as u8);
        writer.write_var_bytes(&self.key);
        writer.write_var_string(&self.field);
        writer.write_var_bytes(&self.value);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let descriptor_type = match reader.read_u8()? {
            0x40 => StateDescriptorType::Account,
            0x48 => StateDescriptorType::Validator,
            other => {
                return Err(IoError::decoding(
                    "state descriptor",
                    format!("unknown type {other:#04x}"),
                ))
            }
        };
        Ok(StateDescriptor {
            descriptor_type,
            key: reader.read_var_bytes(100)?,
            field: reader.read_var_string(32)?,
            value: reader.read_var_bytes(1024)?,
        })
    }
}

/// The per-type payload of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionData {
    /// Consensus reward transaction; `nonce` keeps hashes distinct.
    Miner { nonce: u32 },
    /// Issues units of a registered asset through its outputs.
    Issue,
    /// Claims generated utility tokens from spent coins.
    Claim { claims: Vec<Input> },
    /// Registers a validator candidate.
    Enrollment { public_key: PublicKey },
    /// Registers a new asset.
    Register {
        asset_type: AssetType,
        name: String,
        amount: Fixed8,
        precision: u8,
        owner: PublicKey,
        admin: UInt160,
    },
    /// Plain UTXO transfer; carries no extra data.
    Contract,
    /// Governance state changes.
    State { descriptors: Vec<StateDescriptor> },
    /// Deploys a contract (legacy deployment path).
    Publish {
        script: Vec<u8>,
        param_list: Vec<u8>,
        return_type: u8,
        needs_storage: bool,
        name: String,
        code_version: String,
        author: String,
        email: String,
        description: String,
    },
    /// Runs a script in the application VM.
    Invocation { script: Vec<u8>, gas: Fixed8 },
}

impl TransactionData {
    /// The discriminator for this payload.
    pub fn tx_type(&self) -> TransactionType {
        match self {
            Self::Miner { .. } => TransactionType::Miner,
            Self::Issue => TransactionType::Issue,
            Self::Claim { .. } => TransactionType::Claim,
            Self::Enrollment { .. } => TransactionType::Enrollment,
            Self::Register { .. } => TransactionType::Register,
            Self::Contract => TransactionType::Contract,
            Self::State { .. } => TransactionType::State,
            Self::Publish { .. } => TransactionType::Publish,
            Self::Invocation { .. } => TransactionType::Invocation,
        }
    }

    /// Writes the type-specific fields.
    pub fn serialize(&self, version: u8, writer: &mut BinaryWriter) {
        match self {
            Self::Miner { nonce } => writer.write_u32(*nonce),
            Self::Issue | Self::Contract => {}
            Self::Claim { claims } => writer.write_serializable_list(claims),
            Self::Enrollment { public_key } => write_public_key(writer, public_key),
            Self::Register {
                asset_type,
                name,
                amount,
                precision,
                owner,
                admin,
            } => {
                writer.write_u8(*asset_type as u8);
                writer.write_var_string(name);
                writer.write_serializable(amount);
                writer.write_u8(*precision);
                write_public_key(writer, owner);
                writer.write_serializable(admin);
            }
            Self::State { descriptors } => writer.write_serializable_list(descriptors),
            Self::Publish {
                script,
                param_list,
                return_type,
                needs_storage,
                name,
                code_version,
                author,
                email,
                description,
            } => {
                writer.write_var_bytes(script);
                writer.write_var_bytes(param_list);
                writer.write_u8(*return_type);
                if version >= 1 {
                    writer.write_bool(*needs_storage);
                }
                writer.write_var_string(name);
                writer.write_var_string(code_version);
                writer.write_var_string(author);
                writer.write_var_string(email);
                writer.write_var_string(description);
            }
            Self::Invocation { script, gas } => {
                writer.write_var_bytes(script);
                if version >= 1 {
                    writer.write_serializable(gas);
                }
            }
        }
    }

    /// Parses the type-specific fields.
    pub fn deserialize(
        tx_type: TransactionType,
        version: u8,
        reader: &mut MemoryReader,
    ) -> neo2_io::Result<Self> {
        Ok(match tx_type {
            TransactionType::Miner => Self::Miner {
                nonce: reader.read_u32()?,
            },
            TransactionType::Issue => Self::Issue,
            TransactionType::Contract => Self::Contract,
            TransactionType::Claim => Self::Claim {
                claims: reader.read_serializable_list(MAX_CLAIMS)?,
            },
            TransactionType::Enrollment => Self::Enrollment {
                public_key: read_public_key(reader)?,
            },
            TransactionType::Register => Self::Register {
                asset_type: AssetType::from_byte(reader.read_u8()?)
                    .map_err(|e| IoError::decoding("asset type", e.to_string()))?,
                name: reader.read_var_string(MAX_NAME)?,
                amount: reader.read_serializable()?,
                precision: reader.read_u8()?,
                owner: read_public_key(reader)?,
                admin: reader.read_serializable()?,
            },
            TransactionType::State => Self::State {
                descriptors: reader.read_serializable_list(MAX_DESCRIPTORS)?,
            },
            TransactionType::Publish => Self::Publish {
                script: reader.read_var_bytes(MAX_SCRIPT_SIZE)?,
                param_list: reader.read_var_bytes(255)?,
                return_type: reader.read_u8()?,
                needs_storage: if version >= 1 { reader.read_bool()? } else { false },
                name: reader.read_var_string(MAX_NAME)?,
                code_version: reader.read_var_string(MAX_NAME)?,
                author: reader.read_var_string(MAX_NAME)?,
                email: reader.read_var_string(MAX_NAME)?,
                description: reader.read_var_string(MAX_NAME)?,
            },
            TransactionType::Invocation => Self::Invocation {
                script: reader.read_var_bytes(MAX_SCRIPT_SIZE)?,
                gas: if version >= 1 {
                    reader.read_serializable()?
                } else {
                    Fixed8::ZERO
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use neo2_crypto::KeyPair;

    #[test]
    fn miner_nonce_round_trip() {
        let tx = Transaction::new(0, TransactionData::Miner { nonce: 0xdeadbeef });
        let bytes = neo2_io::to_bytes(&tx);
        let parsed: Transaction = neo2_io::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.data, TransactionData::Miner { nonce: 0xdeadbeef });
    }

    #[test]
    fn invocation_gas_only_with_version_one() {
        let data = TransactionData::Invocation {
            script: vec![0x51],
            gas: Fixed8::from_int(10),
        };
        let v0 = neo2_io::to_bytes(&Transaction::new(0, data.clone()));
        let v1 = neo2_io::to_bytes(&Transaction::new(1, data));
        assert_eq!(v1.len(), v0.len() + 8);
    }

    #[test]
    fn register_round_trip() {
        let owner = *KeyPair::generate().public_key();
        let tx = Transaction::new(
            0,
            TransactionData::Register {
                asset_type: AssetType::GoverningToken,
                name: "NEO".into(),
                amount: Fixed8::from_int(100_000_000),
                precision: 0,
                owner,
                admin: UInt160([1u8; 20]),
            },
        );
        let parsed: Transaction = neo2_io::from_bytes(&neo2_io::to_bytes(&tx)).unwrap();
        assert_eq!(parsed, tx);
    }

    #[test]
    fn enrollment_requires_valid_key_prefix() {
        // Type 0x20, version 0, then junk where a key belongs.
        let bytes = [0x20u8, 0x00, 0x99, 0x01, 0x02];
        assert!(neo2_io::from_bytes::<Transaction>(&bytes).is_err());
    }
}
