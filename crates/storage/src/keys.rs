//! Key-space layout: one byte of prefix per record family.

use neo2_core::{UInt160, UInt256};

/// Storage key prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Prefix {
    DataBlock = 0x01,
    DataTransaction = 0x02,
    DataMptNode = 0x03,
    DataStateRoot = 0x04,
    StAccount = 0x40,
    StCoin = 0x44,
    StSpentCoin = 0x45,
    StValidator = 0x48,
    StAsset = 0x4c,
    StContract = 0x50,
    StStorage = 0x70,
    StNep5Balances = 0x78,
    IxHeaderHashList = 0x80,
    StAppExecResult = 0x90,
    SysCurrentBlock = 0xc0,
    SysVersion = 0xf0,
}

/// Key for a record addressed by a 256-bit hash.
pub fn hash256_key(prefix: Prefix, hash: &UInt256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix as u8);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Key for a record addressed by a 160-bit hash.
pub fn hash160_key(prefix: Prefix, hash: &UInt160) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(prefix as u8);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Key for one item of a contract's storage.
pub fn storage_item_key(script_hash: &UInt160, item_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(21 + item_key.len());
    key.push(Prefix::StStorage as u8);
    key.extend_from_slice(script_hash.as_bytes());
    key.extend_from_slice(item_key);
    key
}

/// Prefix covering every storage item of one contract.
pub fn storage_scope_prefix(script_hash: &UInt160) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(Prefix::StStorage as u8);
    key.extend_from_slice(script_hash.as_bytes());
    key
}

/// Key for a validator record addressed by public key bytes.
pub fn validator_key(public_key: &[u8; 33]) -> Vec<u8> {
    let mut key = Vec::with_capacity(34);
    key.push(Prefix::StValidator as u8);
    key.extend_from_slice(public_key);
    key
}

/// Key for one page of the header hash list.
pub fn header_hash_page_key(start: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(Prefix::IxHeaderHashList as u8);
    key.extend_from_slice(&start.to_le_bytes());
    key
}

/// Key for the persisted state root at a height.
pub fn state_root_key(height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(Prefix::DataStateRoot as u8);
    key.extend_from_slice(&height.to_le_bytes());
    key
}

/// The single current-block pointer key.
pub fn current_block_key() -> Vec<u8> {
    vec![Prefix::SysCurrentBlock as u8]
}

/// The single schema-version key.
pub fn version_key() -> Vec<u8> {
    vec![Prefix::SysVersion as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_scope_by_contract() {
        let a = UInt160([1u8; 20]);
        let b = UInt160([2u8; 20]);
        let key = storage_item_key(&a, b"k");
        assert!(key.starts_with(&storage_scope_prefix(&a)));
        assert!(!key.starts_with(&storage_scope_prefix(&b)));
    }

    #[test]
    fn prefixes_do_not_collide() {
        let tx_key = hash256_key(Prefix::DataTransaction, &UInt256::zero());
        let block_key = hash256_key(Prefix::DataBlock, &UInt256::zero());
        assert_ne!(tx_key, block_key);
    }
}
