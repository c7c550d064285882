//! The trie proper: put/get/delete with canonical-form maintenance.

use crate::node::{Node, BRANCH_WIDTH};
use crate::{to_nibbles, MptError, MptResult};
use neo2_core::UInt256;
use std::collections::HashMap;

/// Read access to persisted nodes, keyed by their hash.
pub trait NodeSource {
    /// The serialized node for the given hash, if persisted.
    fn node_bytes(&self, hash: &UInt256) -> Option<Vec<u8>>;
}

/// An in-memory node source backed by a hash map.
#[derive(Debug, Default, Clone)]
pub struct MemoryNodeSource {
    nodes: HashMap<UInt256, Vec<u8>>,
}

impl MemoryNodeSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a serialized node. Content-addressed writes are idempotent.
    pub fn insert(&mut self, hash: UInt256, bytes: Vec<u8>) {
        self.nodes.insert(hash, bytes);
    }

    /// Bulk-stores committed nodes.
    pub fn insert_all(&mut self, nodes: Vec<(UInt256, Vec<u8>)>) {
        for (hash, bytes) in nodes {
            self.insert(hash, bytes);
        }
    }
}

impl NodeSource for MemoryNodeSource {
    fn node_bytes(&self, hash: &UInt256) -> Option<Vec<u8>> {
        self.nodes.get(hash).cloned()
    }
}

/// A Merkle-Patricia trie over a node source.
///
/// Mutations build materialized nodes in memory; [`Trie::commit`] returns
/// the new content-addressed nodes for the caller to persist. After every
/// mutation the tree is in canonical form: no zero-length extensions, no
/// single-child branches, no nested extensions.
pub struct Trie<S: NodeSource> {
    root: Option<Node>,
    source: S,
}

impl<S: NodeSource> Trie<S> {
    /// Opens a trie at the given root (`None` for an empty trie).
    pub fn new(root: Option<UInt256>, source: S) -> Self {
        Trie {
            root: root.map(Node::Hash),
            source,
        }
    }

    /// The backing node source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Root hash; all zero for the empty trie.
    pub fn root_hash(&self) -> UInt256 {
        self.root.as_ref().map(Node::hash).unwrap_or_else(UInt256::zero)
    }

    fn resolve(&self, node: Node) -> MptResult<Node> {
        match node {
            Node::Hash(hash) => {
                let bytes = self
                    .source
                    .node_bytes(&hash)
                    .ok_or(MptError::MissingNode(hash))?;
                Node::from_bytes(&bytes)
            }
            other => Ok(other),
        }
    }

    /// Looks up a key.
    pub fn get(&self, key: &[u8]) -> MptResult<Option<Vec<u8>>> {
        let Some(root) = &self.root else {
            return Ok(None);
        };
        self.get_from(root.clone(), &to_nibbles(key))
    }

    fn get_from(&self, node: Node, path: &[u8]) -> MptResult<Option<Vec<u8>>> {
        let node = self.resolve(node)?;
        match node {
            Node::Leaf(value) => Ok(if path.is_empty() { Some(value) } else { None }),
            Node::Branch(children) => {
                let index = if path.is_empty() { 16 } else { path[0] as usize };
                let rest = if path.is_empty() { &[][..] } else { &path[1..] };
                match &children[index] {
                    Some(child) => self.get_from(child.clone(), rest),
                    None => Ok(None),
                }
            }
            Node::Extension { key, next } => match path.strip_prefix(key.as_slice()) {
                Some(rest) => self.get_from(*next, rest),
                None => Ok(None),
            },
            Node::Hash(_) => unreachable!("resolve returned a hash node"),
        }
    }

    /// Inserts or replaces a value.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> MptResult<()> {
        let path = to_nibbles(key);
        let root = self.root.take();
        self.root = Some(self.put_into(root, &path, value)?);
        Ok(())
    }

    fn put_into(&self, node: Option<Node>, path: &[u8], value: Vec<u8>) -> MptResult<Node> {
        let Some(node) = node else {
            return Ok(make_path_node(path, value));
        };
        let node = self.resolve(node)?;
        match node {
            Node::Leaf(old) => {
                if path.is_empty() {
                    return Ok(Node::Leaf(value));
                }
                // The stored key is a strict prefix of the new one: grow a
                // branch holding the old value in its value slot.
                let mut children: [Option<Node>; BRANCH_WIDTH] = std::array::from_fn(|_| None);
                children[16] = Some(Node::Leaf(old));
                children[path[0] as usize] = Some(make_path_node(&path[1..], value));
                Ok(Node::Branch(Box::new(children)))
            }
            Node::Branch(mut children) => {
                if path.is_empty() {
                    children[16] = Some(Node::Leaf(value));
                } else {
                    let index = path[0] as usize;
                    let child = children[index].take();
                    children[index] = Some(self.put_into(child, &path[1..], value)?);
                }
                Ok(Node::Branch(children))
            }
            Node::Extension { key, next } => {
                let common = key
                    .iter()
                    .zip(path.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                if common == key.len() {
                    let next = self.put_into(Some(*next), &path[common..], value)?;
                    return Ok(Node::Extension {
                        key,
                        next: Box::new(next),
                    });
                }

                // Split at the divergence point.
                let mut children: [Option<Node>; BRANCH_WIDTH] = std::array::from_fn(|_| None);
                let ext_index = key[common] as usize;
                let ext_rest = key[common + 1..].to_vec();
                children[ext_index] = Some(if ext_rest.is_empty() {
                    *next
                } else {
                    Node::Extension {
                        key: ext_rest,
                        next,
                    }
                });

                if path.len() == common {
                    children[16] = Some(Node::Leaf(value));
                } else {
                    children[path[common] as usize] =
                        Some(make_path_node(&path[common + 1..], value));
                }

                let branch = Node::Branch(Box::new(children));
                if common == 0 {
                    Ok(branch)
                } else {
                    Ok(Node::Extension {
                        key: key[..common].to_vec(),
                        next: Box::new(branch),
                    })
                }
            }
            Node::Hash(_) => unreachable!("resolve returned a hash node"),
        }
    }

    /// Removes a key; absent keys are a no-op.
    pub fn delete(&mut self, key: &[u8]) -> MptResult<()> {
        let path = to_nibbles(key);
        let root = self.root.take();
        self.root = self.delete_from(root, &path)?;
        Ok(())
    }

    fn delete_from(&self, node: Option<Node>, path: &[u8]) -> MptResult<Option<Node>> {
        let Some(node) = node else {
            return Ok(None);
        };
        let node = self.resolve(node)?;
        match node {
            Node::Leaf(value) => {
                if path.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Node::Leaf(value)))
                }
            }
            Node::Branch(mut children) => {
                if path.is_empty() {
                    children[16] = None;
                } else {
                    let index = path[0] as usize;
                    let child = children[index].take();
                    children[index] = self.delete_from(child, &path[1..])?;
                }
                self.canonicalize_branch(children)
            }
            Node::Extension { key, next } => match path.strip_prefix(key.as_slice()) {
                Some(rest) => {
                    let next = self.delete_from(Some(*next), rest)?;
                    match next {
                        None => Ok(None),
                        Some(Node::Extension { key: k2, next: n2 }) => {
                            // Merge nested extensions.
                            let mut merged = key;
                            merged.extend_from_slice(&k2);
                            Ok(Some(Node::Extension {
                                key: merged,
                                next: n2,
                            }))
                        }
                        Some(other) => Ok(Some(Node::Extension {
                            key,
                            next: Box::new(other),
                        })),
                    }
                }
                None => Ok(Some(Node::Extension { key, next })),
            },
            Node::Hash(_) => unreachable!("resolve returned a hash node"),
        }
    }

    /// Restores canonical form after a branch child was removed.
    fn canonicalize_branch(
        &self,
        children: Box<[Option<Node>; BRANCH_WIDTH]>,
    ) -> MptResult<Option<Node>> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
            .collect();
        match occupied.len() {
            0 => Ok(None),
            1 => {
                let index = occupied[0];
                let mut children = children;
                let child = children[index].take().expect("occupied slot");
                if index == 16 {
                    // Only the value remains; the branch collapses to a leaf.
                    return Ok(Some(self.resolve(child)?));
                }
                let child = self.resolve(child)?;
                Ok(Some(match child {
                    Node::Extension { key, next } => {
                        let mut merged = vec![index as u8];
                        merged.extend_from_slice(&key);
                        Node::Extension { key: merged, next }
                    }
                    other => Node::Extension {
                        key: vec![index as u8],
                        next: Box::new(other),
                    },
                }))
            }
            _ => Ok(Some(Node::Branch(children))),
        }
    }

    /// Serialized encodings of every materialized node, content-addressed.
    /// Persist these and the trie can be reopened at [`Trie::root_hash`].
    pub fn commit(&self) -> Vec<(UInt256, Vec<u8>)> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            collect_nodes(root, &mut out);
        }
        out
    }

    /// The ordered node chain proving the value of `key` under the current
    /// root. The chain starts at the root node.
    pub fn get_proof(&self, key: &[u8]) -> MptResult<Vec<Vec<u8>>> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        let mut proof = Vec::new();
        self.proof_from(root.clone(), &to_nibbles(key), &mut proof)?;
        Ok(proof)
    }

    fn proof_from(&self, node: Node, path: &[u8], proof: &mut Vec<Vec<u8>>) -> MptResult<()> {
        let node = self.resolve(node)?;
        proof.push(node.to_bytes());
        match node {
            Node::Leaf(_) => Ok(()),
            Node::Branch(children) => {
                let index = if path.is_empty() { 16 } else { path[0] as usize };
                let rest = if path.is_empty() { &[][..] } else { &path[1..] };
                match &children[index] {
                    Some(child) => self.proof_from(child.clone(), rest, proof),
                    None => Ok(()),
                }
            }
            Node::Extension { key, next } => match path.strip_prefix(key.as_slice()) {
                Some(rest) => self.proof_from(*next, rest, proof),
                None => Ok(()),
            },
            Node::Hash(_) => unreachable!("resolve returned a hash node"),
        }
    }
}

fn collect_nodes(node: &Node, out: &mut Vec<(UInt256, Vec<u8>)>) {
    match node {
        // Hash references point at already-persisted subtrees.
        Node::Hash(_) => {}
        Node::Leaf(_) => out.push((node.hash(), node.to_bytes())),
        Node::Extension { next, .. } => {
            out.push((node.hash(), node.to_bytes()));
            collect_nodes(next, out);
        }
        Node::Branch(children) => {
            out.push((node.hash(), node.to_bytes()));
            for child in children.iter().flatten() {
                collect_nodes(child, out);
            }
        }
    }
}

/// Builds the minimal node chain for a fresh path: a leaf, behind an
/// extension when nibbles remain.
fn make_path_node(path: &[u8], value: Vec<u8>) -> Node {
    if path.is_empty() {
        Node::Leaf(value)
    } else {
        Node::Extension {
            key: path.to_vec(),
            next: Box::new(Node::Leaf(value)),
        }
    }
}
