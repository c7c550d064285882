//! Stateless proof verification.

use crate::node::Node;
use crate::{to_nibbles, MptError, MptResult};
use neo2_core::UInt256;
use std::collections::HashMap;

/// Verifies a node chain against a root hash and reproduces the `Get`
/// result for `key`.
///
/// Every node is re-hashed; any byte of a tampered proof changes a hash and
/// breaks the chain. Returns the stored value, or `None` when the proof
/// shows the key absent.
pub fn verify_proof(
    root: &UInt256,
    key: &[u8],
    proof: &[Vec<u8>],
) -> MptResult<Option<Vec<u8>>> {
    if root.is_zero() {
        return if proof.is_empty() {
            Ok(None)
        } else {
            Err(MptError::InvalidProof)
        };
    }

    let mut nodes: HashMap<UInt256, &[u8]> = HashMap::with_capacity(proof.len());
    for bytes in proof {
        nodes.insert(UInt256(neo2_crypto::sha256(bytes)), bytes.as_slice());
    }

    let mut current = *root;
    let mut path = to_nibbles(key);
    loop {
        let bytes = nodes.get(&current).ok_or(MptError::InvalidProof)?;
        let node = Node::from_bytes(bytes).map_err(|_| MptError::InvalidProof)?;
        match node {
            Node::Leaf(value) => {
                return if path.is_empty() {
                    Ok(Some(value))
                } else {
                    Ok(None)
                };
            }
            Node::Branch(children) => {
                let index = if path.is_empty() {
                    16
                } else {
                    let i = path.remove(0);
                    i as usize
                };
                match &children[index] {
                    Some(child) => current = child.hash(),
                    None => return Ok(None),
                }
            }
            Node::Extension { key: ext_key, next } => {
                match path.strip_prefix(ext_key.as_slice()) {
                    Some(rest) => {
                        path = rest.to_vec();
                        current = next.hash();
                    }
                    None => return Ok(None),
                }
            }
            Node::Hash(_) => return Err(MptError::InvalidProof),
        }
    }
}
