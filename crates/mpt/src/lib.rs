//! Radix-16 Merkle-Patricia trie.
//!
//! The trie authenticates the contract-storage state: the root hash at one
//! height is an input to the next height's root, so any divergence is
//! terminal. Nodes persist content-addressed by their own hash; historical
//! nodes are never deleted.

pub mod node;
pub mod proof;
pub mod trie;

pub use node::Node;
pub use proof::verify_proof;
pub use trie::{MemoryNodeSource, NodeSource, Trie};

use neo2_core::UInt256;

/// Errors from trie operations.
#[derive(Debug, thiserror::Error)]
pub enum MptError {
    #[error("node {0} not found in the backing store")]
    MissingNode(UInt256),

    #[error("malformed node encoding: {0}")]
    InvalidNode(String),

    #[error("proof does not match the root")]
    InvalidProof,

    #[error(transparent)]
    Io(#[from] neo2_io::Error),
}

/// Result alias for trie operations.
pub type MptResult<T> = std::result::Result<T, MptError>;

/// Splits a byte key into its nibble path (high nibble first).
pub fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for byte in key {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibble_expansion() {
        assert_eq!(to_nibbles(&[0xab, 0x01]), vec![0x0a, 0x0b, 0x00, 0x01]);
        assert!(to_nibbles(&[]).is_empty());
    }
}
