//! Validator candidate state.

use crate::Fixed8;
use neo2_crypto::PublicKey;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};

/// A registered validator candidate and its vote weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorState {
    pub public_key: PublicKey,
    pub registered: bool,
    pub votes: Fixed8,
}

impl ValidatorState {
    /// A newly registered candidate with no votes.
    pub fn new(public_key: PublicKey) -> Self {
        ValidatorState {
            public_key,
            registered: true,
            votes: Fixed8::ZERO,
        }
    }
}

impl Serializable for ValidatorState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.public_key.to_bytes());
        writer.write_bool(self.registered);
        writer.write_serializable(&self.votes);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let bytes = reader.read_bytes(33)?;
        Ok(ValidatorState {
            public_key: PublicKey::from_bytes(&bytes)
                .map_err(|e| neo2_io::Error::decoding("validator", e.to_string()))?,
            registered: reader.read_bool()?,
            votes: reader.read_serializable()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo2_crypto::KeyPair;

    #[test]
    fn round_trip() {
        let validator = ValidatorState::new(*KeyPair::generate().public_key());
        let bytes = neo2_io::to_bytes(&validator);
        assert_eq!(
            neo2_io::from_bytes::<ValidatorState>(&bytes).unwrap(),
            validator
        );
    }
}
