//! Per-network parameters, threaded explicitly through construction.

use crate::{Error, Result, UInt160};
use neo2_crypto::{checksum, PublicKey};
use serde::{Deserialize, Serialize};

/// Static parameters distinguishing mainnet, testnet and private nets.
///
/// There is deliberately no process-global default; every component that
/// needs network identity receives a `NetworkParams` at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Network magic included in the P2P handshake.
    pub magic: u32,
    /// Version byte prepended to script hashes in addresses.
    pub address_version: u8,
    /// Target seconds between blocks; drives the consensus timer.
    pub seconds_per_block: u32,
    /// Maximum transactions packed into one proposed block.
    pub max_transactions_per_block: usize,
    /// Compressed public keys of the standby validator set.
    #[serde(skip)]
    pub standby_validators: Vec<PublicKey>,
    /// Whether consensus messages carry state-root signatures.
    pub state_root_enabled: bool,
}

impl NetworkParams {
    /// Parameters for an isolated private network with the given validators.
    pub fn privnet(standby_validators: Vec<PublicKey>) -> Self {
        NetworkParams {
            magic: 56753,
            address_version: 0x17,
            seconds_per_block: 15,
            max_transactions_per_block: 500,
            standby_validators,
            state_root_enabled: false,
        }
    }

    /// Encodes a script hash as a base58check address.
    pub fn address_from_script_hash(&self, hash: &UInt160) -> String {
        let mut data = Vec::with_capacity(25);
        data.push(self.address_version);
        data.extend_from_slice(hash.as_bytes());
        let check = checksum(&data);
        data.extend_from_slice(&check);
        bs58::encode(data).into_string()
    }

    /// Decodes a base58check address back to a script hash.
    pub fn script_hash_from_address(&self, address: &str) -> Result<UInt160> {
        let data = bs58::decode(address)
            .into_vec()
            .map_err(|e| Error::format("address", e.to_string()))?;
        if data.len() != 25 {
            return Err(Error::format("address", "wrong payload length"));
        }
        if data[0] != self.address_version {
            return Err(Error::format("address", "version byte mismatch"));
        }
        let (payload, check) = data.split_at(21);
        if checksum(payload) != check {
            return Err(Error::format("address", "checksum mismatch"));
        }
        UInt160::from_bytes(&payload[1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let params = NetworkParams::privnet(vec![]);
        let hash = UInt160([7u8; 20]);
        let address = params.address_from_script_hash(&hash);
        assert_eq!(params.script_hash_from_address(&address).unwrap(), hash);
    }

    #[test]
    fn corrupted_address_rejected() {
        let params = NetworkParams::privnet(vec![]);
        let mut address = params.address_from_script_hash(&UInt160::zero());
        // Flip one character, keeping it in the base58 alphabet.
        let replacement = if address.ends_with('1') { '2' } else { '1' };
        address.pop();
        address.push(replacement);
        assert!(params.script_hash_from_address(&address).is_err());
    }
}
