//! Per-address account state.

use crate::{Fixed8, UInt160, UInt256};
use neo2_crypto::PublicKey;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use std::collections::BTreeMap;

const MAX_VOTES: usize = 1024;
const MAX_BALANCES: usize = 65535;

/// Balances and votes attached to one script hash.
///
/// Balances are kept in an ordered map so the serialized form is canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub script_hash: UInt160,
    pub is_frozen: bool,
    pub votes: Vec<PublicKey>,
    pub balances: BTreeMap<UInt256, Fixed8>,
}

impl AccountState {
    /// A fresh account with no balances.
    pub fn new(script_hash: UInt160) -> Self {
        AccountState {
            script_hash,
            is_frozen: false,
            votes: Vec::new(),
            balances: BTreeMap::new(),
        }
    }

    /// Balance of the given asset, zero when absent.
    pub fn balance(&self, asset_id: &UInt256) -> Fixed8 {
        self.balances.get(asset_id).copied().unwrap_or_default()
    }

    /// Adds (or subtracts, when negative) to an asset balance, dropping the
    /// entry when it reaches zero.
    pub fn adjust_balance(&mut self, asset_id: UInt256, delta: Fixed8) {
        let updated = self.balance(&asset_id) + delta;
        if updated == Fixed8::ZERO {
            self.balances.remove(&asset_id);
        } else {
            self.balances.insert(asset_id, updated);
        }
    }
}

impl Serializable for AccountState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.script_hash);
        writer.write_bool(self.is_frozen);
        writer.write_var_uint(self.votes.len() as u64);
        for vote in &self.votes {
            writer.write_bytes(&vote.to_bytes());
        }
        writer.write_var_uint(self.balances.len() as u64);
        for (asset, amount) in &self.balances {
            writer.write_serializable(asset);
            writer.write_serializable(amount);
        }
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let script_hash = reader.read_serializable()?;
        let is_frozen = reader.read_bool()?;
        let vote_count = reader.read_var_uint(MAX_VOTES as u64)? as usize;
        let mut votes = Vec::with_capacity(vote_count);
        for _ in 0..vote_count {
            let bytes = reader.read_bytes(33)?;
            votes.push(
                PublicKey::from_bytes(&bytes)
                    .map_err(|e| neo2_io::Error::decoding("account vote", e.to_string()))?,
            );
        }
        let balance_count = reader.read_var_uint(MAX_BALANCES as u64)? as usize;
        let mut balances = BTreeMap::new();
        for _ in 0..balance_count {
            let asset: UInt256 = reader.read_serializable()?;
            let amount: Fixed8 = reader.read_serializable()?;
            balances.insert(asset, amount);
        }
        Ok(AccountState {
            script_hash,
            is_frozen,
            votes,
            balances,
        })
    }
}
