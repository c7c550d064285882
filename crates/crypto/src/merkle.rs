//! Merkle tree over transaction hashes.
//!
//! Leaves are 32-byte hashes; a parent is the double SHA-256 of the
//! concatenation of its children. An odd node at any level is paired with
//! itself.

use crate::hash::double_sha256;
use crate::{Error, Result};

/// A computed Merkle tree. Only the root is retained.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: [u8; 32],
    depth: usize,
}

impl MerkleTree {
    /// Builds the tree from leaf hashes. Zero leaves is an error; a single
    /// leaf is its own root.
    pub fn new(hashes: &[[u8; 32]]) -> Result<Self> {
        if hashes.is_empty() {
            return Err(Error::EmptyMerkleTree);
        }

        let mut level: Vec<[u8; 32]> = hashes.to_vec();
        let mut depth = 1;
        while level.len() > 1 {
            let mut parents = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&left);
                buf[32..].copy_from_slice(&right);
                parents.push(double_sha256(&buf));
            }
            level = parents;
            depth += 1;
        }

        Ok(MerkleTree {
            root: level[0],
            depth,
        })
    }

    /// The root hash.
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Number of levels including the leaves.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Convenience: computes just the root of the given leaves.
pub fn merkle_root(hashes: &[[u8; 32]]) -> Result<[u8; 32]> {
    MerkleTree::new(hashes).map(|t| t.root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fails() {
        assert!(matches!(MerkleTree::new(&[]), Err(Error::EmptyMerkleTree)));
    }

    #[test]
    fn single_leaf_is_root() {
        let leaf = [7u8; 32];
        let tree = MerkleTree::new(&[leaf]).unwrap();
        assert_eq!(tree.root(), leaf);
    }

    #[test]
    fn two_leaves_hash_concatenation() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&a);
        buf[32..].copy_from_slice(&b);
        assert_eq!(merkle_root(&[a, b]).unwrap(), double_sha256(&buf));
    }

    #[test]
    fn odd_leaf_duplicated() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        // Level 1: h(a,b), h(c,c); root = h(those two).
        let mut ab = [0u8; 64];
        ab[..32].copy_from_slice(&a);
        ab[32..].copy_from_slice(&b);
        let hab = double_sha256(&ab);
        let mut cc = [0u8; 64];
        cc[..32].copy_from_slice(&c);
        cc[32..].copy_from_slice(&c);
        let hcc = double_sha256(&cc);
        let mut top = [0u8; 64];
        top[..32].copy_from_slice(&hab);
        top[32..].copy_from_slice(&hcc);
        assert_eq!(merkle_root(&[a, b, c]).unwrap(), double_sha256(&top));
    }

    #[test]
    fn order_matters() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(merkle_root(&[a, b]).unwrap(), merkle_root(&[b, a]).unwrap());
    }
}
