//! Transactions: the discriminated ledger record.

mod attribute;
mod data;
mod input;
mod output;

pub use attribute::{Attribute, AttributeUsage};
pub use data::{StateDescriptor, StateDescriptorType, TransactionData};
pub use input::Input;
pub use output::Output;

use crate::{Error, Result, UInt160, UInt256, Witness};
use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use std::collections::BTreeSet;

const MAX_ATTRIBUTES: usize = 16;
const MAX_INPUTS: usize = 65535;
const MAX_OUTPUTS: usize = 65535;
const MAX_SCRIPTS: usize = 65535;

/// Transaction discriminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionType {
    Miner = 0x00,
    Issue = 0x01,
    Claim = 0x02,
    Enrollment = 0x20,
    Register = 0x40,
    Contract = 0x80,
    State = 0x90,
    Publish = 0xd0,
    Invocation = 0xd1,
}

impl TransactionType {
    /// Parses a discriminator byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(Self::Miner),
            0x01 => Ok(Self::Issue),
            0x02 => Ok(Self::Claim),
            0x20 => Ok(Self::Enrollment),
            0x40 => Ok(Self::Register),
            0x80 => Ok(Self::Contract),
            0x90 => Ok(Self::State),
            0xd0 => Ok(Self::Publish),
            0xd1 => Ok(Self::Invocation),
            other => Err(Error::format("transaction type", format!("{other:#04x}"))),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Miner => "MinerTransaction",
            Self::Issue => "IssueTransaction",
            Self::Claim => "ClaimTransaction",
            Self::Enrollment => "EnrollmentTransaction",
            Self::Register => "RegisterTransaction",
            Self::Contract => "ContractTransaction",
            Self::State => "StateTransaction",
            Self::Publish => "PublishTransaction",
            Self::Invocation => "InvocationTransaction",
        };
        f.write_str(name)
    }
}

/// A ledger transaction.
///
/// The hash covers the unsigned part only (everything before `scripts`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub data: TransactionData,
    pub attributes: Vec<Attribute>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub scripts: Vec<Witness>,
}

impl Transaction {
    /// Creates a transaction with the given payload and empty lists.
    pub fn new(version: u8, data: TransactionData) -> Self {
        Transaction {
            version,
            data,
            attributes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            scripts: Vec::new(),
        }
    }

    /// The discriminator implied by the payload.
    pub fn tx_type(&self) -> TransactionType {
        self.data.tx_type()
    }

    /// Writes the unsigned part (hashed and signed portion).
    pub fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.tx_type() as u8);
        writer.write_u8(self.version);
        self.data.serialize(self.version, writer);
        writer.write_serializable_list(&self.attributes);
        writer.write_serializable_list(&self.inputs);
        writer.write_serializable_list(&self.outputs);
    }

    /// The unsigned body as bytes.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.serialize_unsigned(&mut writer);
        writer.into_bytes()
    }

    /// Transaction hash: double SHA-256 of the unsigned body.
    pub fn hash(&self) -> UInt256 {
        UInt256::hash(&self.unsigned_bytes())
    }

    /// Whether any `(prev_hash, prev_index)` pair appears twice.
    pub fn has_duplicate_inputs(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.inputs.iter().any(|i| !seen.insert((i.prev_hash, i.prev_index)))
    }

    /// Sum of outputs per asset.
    pub fn outputs_per_asset(&self) -> std::collections::BTreeMap<UInt256, crate::Fixed8> {
        let mut sums = std::collections::BTreeMap::new();
        for output in &self.outputs {
            *sums.entry(output.asset_id).or_default() += output.amount;
        }
        sums
    }

    /// The set of script hashes whose witnesses must verify this transaction.
    ///
    /// `resolve` maps an input to the output it spends; inputs that do not
    /// resolve are a validation error. The set is ordered, and witnesses are
    /// expected in the same order.
    pub fn script_hashes_for_verifying<F>(&self, resolve: F) -> Result<BTreeSet<UInt160>>
    where
        F: Fn(&Input) -> Option<Output>,
    {
        let mut hashes = BTreeSet::new();

        for input in &self.inputs {
            let output = resolve(input).ok_or_else(|| {
                Error::validation(format!("unknown input {}:{}", input.prev_hash, input.prev_index))
            })?;
            hashes.insert(output.script_hash);
        }

        for attribute in &self.attributes {
            if attribute.usage == AttributeUsage::Script {
                hashes.insert(UInt160::from_bytes(&attribute.data)?);
            }
        }

        match &self.data {
            TransactionData::Claim { claims } => {
                for claim in claims {
                    let output = resolve(claim).ok_or_else(|| {
                        Error::validation(format!(
                            "unknown claim {}:{}",
                            claim.prev_hash, claim.prev_index
                        ))
                    })?;
                    hashes.insert(output.script_hash);
                }
            }
            TransactionData::Enrollment { public_key } => {
                hashes.insert(crate::transaction::data::public_key_script_hash(public_key));
            }
            TransactionData::Register { owner, .. } => {
                hashes.insert(crate::transaction::data::public_key_script_hash(owner));
            }
            TransactionData::State { descriptors } => {
                for descriptor in descriptors {
                    descriptor.add_verifying_hash(&mut hashes)?;
                }
            }
            _ => {}
        }

        Ok(hashes)
    }
}

impl Serializable for Transaction {
    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        writer.write_serializable_list(&self.scripts);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let tx_type = TransactionType::from_byte(reader.read_u8()?)
            .map_err(|e| neo2_io::Error::decoding("transaction", e.to_string()))?;
        let version = reader.read_u8()?;
        let data = TransactionData::deserialize(tx_type, version, reader)?;
        let attributes = reader.read_serializable_list(MAX_ATTRIBUTES)?;
        let inputs = reader.read_serializable_list(MAX_INPUTS)?;
        let outputs = reader.read_serializable_list(MAX_OUTPUTS)?;
        let scripts = reader.read_serializable_list(MAX_SCRIPTS)?;
        Ok(Transaction {
            version,
            data,
            attributes,
            inputs,
            outputs,
            scripts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fixed8;

    fn sample_contract_tx() -> Transaction {
        let mut tx = Transaction::new(0, TransactionData::Contract);
        tx.inputs.push(Input::new(UInt256::hash(b"prev"), 0));
        tx.outputs.push(Output::new(
            UInt256::hash(b"neo"),
            Fixed8::from_int(40),
            UInt160([2u8; 20]),
        ));
        tx.scripts.push(Witness::new(vec![0x00], vec![0x51]));
        tx
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let tx = sample_contract_tx();
        let bytes = neo2_io::to_bytes(&tx);
        let parsed: Transaction = neo2_io::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(neo2_io::to_bytes(&parsed), bytes);
    }

    #[test]
    fn hash_ignores_witnesses() {
        let mut tx = sample_contract_tx();
        let before = tx.hash();
        tx.scripts[0].invocation_script = vec![0xde, 0xad];
        assert_eq!(tx.hash(), before);
    }

    #[test]
    fn hash_covers_outputs() {
        let mut tx = sample_contract_tx();
        let before = tx.hash();
        tx.outputs[0].amount = Fixed8::from_int(41);
        assert_ne!(tx.hash(), before);
    }

    #[test]
    fn duplicate_inputs_detected() {
        let mut tx = sample_contract_tx();
        assert!(!tx.has_duplicate_inputs());
        tx.inputs.push(tx.inputs[0].clone());
        assert!(tx.has_duplicate_inputs());
    }

    #[test]
    fn verifying_hashes_include_input_owner_and_script_attribute() {
        let mut tx = sample_contract_tx();
        let owner = UInt160([9u8; 20]);
        tx.attributes.push(Attribute::new(
            AttributeUsage::Script,
            UInt160([5u8; 20]).as_bytes().to_vec(),
        ));
        let resolved = Output::new(UInt256::hash(b"neo"), Fixed8::from_int(100), owner);
        let hashes = tx
            .script_hashes_for_verifying(|_| Some(resolved.clone()))
            .unwrap();
        assert!(hashes.contains(&owner));
        assert!(hashes.contains(&UInt160([5u8; 20])));
    }

    #[test]
    fn unresolvable_input_is_an_error() {
        let tx = sample_contract_tx();
        assert!(tx.script_hashes_for_verifying(|_| None).is_err());
    }
}
