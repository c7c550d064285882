//! The signed consensus payload envelope.

use crate::message::ConsensusMessage;
use neo2_core::{UInt160, UInt256, Witness};
use neo2_crypto::{KeyPair, PublicKey, Signature};
use neo2_io::{BinaryWriter, Error as IoError, MemoryReader, Serializable};
use neo2_vm::contract::{create_signature_redeem_script, is_signature_contract};

const MAX_DATA: usize = 1024 * 1024;

/// One consensus payload: routing fields, the serialized message, and the
/// sender's witness. The hash and signature cover the unsigned encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusPayload {
    pub version: u32,
    pub prev_hash: UInt256,
    pub height: u32,
    pub validator_index: u16,
    pub timestamp: u32,
    /// Serialized [`ConsensusMessage`].
    pub data: Vec<u8>,
    pub witness: Witness,
}

impl ConsensusPayload {
    /// Wraps a message for sending.
    pub fn new(
        prev_hash: UInt256,
        height: u32,
        validator_index: u16,
        timestamp: u32,
        message: &ConsensusMessage,
        view_number: u8,
        state_root_enabled: bool,
    ) -> Self {
        ConsensusPayload {
            version: 0,
            prev_hash,
            height,
            validator_index,
            timestamp,
            data: message.to_bytes(view_number, state_root_enabled),
            witness: Witness::default(),
        }
    }

    /// Writes the unsigned part.
    pub fn serialize_unsigned(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_serializable(&self.prev_hash);
        writer.write_u32(self.height);
        writer.write_u16(self.validator_index);
        writer.write_u32(self.timestamp);
        writer.write_var_bytes(&self.data);
    }

    /// The unsigned encoding.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.serialize_unsigned(&mut writer);
        writer.into_bytes()
    }

    /// Payload hash: double SHA-256 of the unsigned encoding.
    pub fn hash(&self) -> UInt256 {
        UInt256::hash(&self.unsigned_bytes())
    }

    /// Decodes the carried message, returning it with its view number.
    pub fn message(&self, state_root_enabled: bool) -> neo2_io::Result<(ConsensusMessage, u8)> {
        ConsensusMessage::from_bytes(&self.data, state_root_enabled)
    }

    /// Signs the payload, installing the witness scripts.
    pub fn sign(&mut self, key: &KeyPair) -> neo2_crypto::Result<()> {
        let digest = neo2_crypto::double_sha256(&self.unsigned_bytes());
        let signature = key.sign_hash(&digest)?;
        let mut invocation = Vec::with_capacity(65);
        invocation.push(0x40);
        invocation.extend_from_slice(signature.as_bytes());
        self.witness = Witness::new(invocation, create_signature_redeem_script(key.public_key()));
        Ok(())
    }

    /// Verifies the witness against the expected validator key.
    pub fn verify(&self, validator: &PublicKey) -> bool {
        let verification = &self.witness.verification_script;
        if !is_signature_contract(verification) {
            return false;
        }
        if verification[1..34] != validator.to_bytes() {
            return false;
        }
        let invocation = &self.witness.invocation_script;
        if invocation.len() != 65 || invocation[0] != 0x40 {
            return false;
        }
        let Ok(signature) = Signature::from_slice(&invocation[1..]) else {
            return false;
        };
        let digest = neo2_crypto::double_sha256(&self.unsigned_bytes());
        validator.verify_hash(&digest, &signature)
    }

    /// Script hash of the sender's witness.
    pub fn witness_script_hash(&self) -> UInt160 {
        self.witness.script_hash()
    }
}

impl Serializable for ConsensusPayload {
    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_unsigned(writer);
        writer.write_u8(1);
        writer.write_serializable(&self.witness);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let version = reader.read_u32()?;
        let prev_hash = reader.read_serializable()?;
        let height = reader.read_u32()?;
        let validator_index = reader.read_u16()?;
        let timestamp = reader.read_u32()?;
        let data = reader.read_var_bytes(MAX_DATA)?;
        let marker = reader.read_u8()?;
        if marker != 1 {
            return Err(IoError::decoding(
                "consensus payload",
                format!("witness marker must be 1, got {marker}"),
            ));
        }
        Ok(ConsensusPayload {
            version,
            prev_hash,
            height,
            validator_index,
            timestamp,
            data,
            witness: reader.read_serializable()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChangeView, ConsensusMessage};

    fn sample_payload() -> ConsensusPayload {
        ConsensusPayload::new(
            UInt256::hash(b"prev"),
            7,
            2,
            1000,
            &ConsensusMessage::ChangeView(ChangeView {
                new_view_number: 1,
                timestamp: 1000,
            }),
            0,
            false,
        )
    }

    #[test]
    fn wire_round_trip() {
        let mut payload = sample_payload();
        payload.sign(&KeyPair::generate()).unwrap();
        let bytes = neo2_io::to_bytes(&payload);
        let parsed: ConsensusPayload = neo2_io::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.hash(), payload.hash());
    }

    #[test]
    fn sign_and_verify() {
        let key = KeyPair::generate();
        let mut payload = sample_payload();
        payload.sign(&key).unwrap();
        assert!(payload.verify(key.public_key()));

        // A different key must not verify.
        assert!(!payload.verify(KeyPair::generate().public_key()));
    }

    #[test]
    fn tampering_breaks_verification() {
        let key = KeyPair::generate();
        let mut payload = sample_payload();
        payload.sign(&key).unwrap();
        payload.height += 1;
        assert!(!payload.verify(key.public_key()));
    }

    #[test]
    fn hash_excludes_witness() {
        let key = KeyPair::generate();
        let mut payload = sample_payload();
        let before = payload.hash();
        payload.sign(&key).unwrap();
        assert_eq!(payload.hash(), before);
    }
}
