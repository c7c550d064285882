//! Behavioral tests for the trie: round trips, determinism, proofs.

use neo2_core::UInt256;
use neo2_mpt::{verify_proof, MemoryNodeSource, Trie};

fn empty_trie() -> Trie<MemoryNodeSource> {
    Trie::new(None, MemoryNodeSource::new())
}

#[test]
fn get_after_put_returns_value() {
    let mut trie = empty_trie();
    trie.put(b"key", b"value".to_vec()).unwrap();
    assert_eq!(trie.get(b"key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(trie.get(b"other").unwrap(), None);
}

#[test]
fn put_overwrites() {
    let mut trie = empty_trie();
    trie.put(b"key", b"one".to_vec()).unwrap();
    trie.put(b"key", b"two".to_vec()).unwrap();
    assert_eq!(trie.get(b"key").unwrap(), Some(b"two".to_vec()));
}

#[test]
fn get_after_delete_returns_absent() {
    let mut trie = empty_trie();
    trie.put(b"a", b"1".to_vec()).unwrap();
    trie.put(b"b", b"2".to_vec()).unwrap();
    trie.delete(b"a").unwrap();
    assert_eq!(trie.get(b"a").unwrap(), None);
    assert_eq!(trie.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn empty_trie_root_is_zero() {
    let trie = empty_trie();
    assert!(trie.root_hash().is_zero());
}

#[test]
fn deleting_everything_restores_empty_root() {
    let mut trie = empty_trie();
    trie.put(b"abc", b"1".to_vec()).unwrap();
    trie.put(b"abd", b"2".to_vec()).unwrap();
    trie.delete(b"abc").unwrap();
    trie.delete(b"abd").unwrap();
    assert!(trie.root_hash().is_zero());
}

#[test]
fn prefix_keys_coexist() {
    let mut trie = empty_trie();
    trie.put(b"ab", b"short".to_vec()).unwrap();
    trie.put(b"abcd", b"long".to_vec()).unwrap();
    assert_eq!(trie.get(b"ab").unwrap(), Some(b"short".to_vec()));
    assert_eq!(trie.get(b"abcd").unwrap(), Some(b"long".to_vec()));

    trie.delete(b"ab").unwrap();
    assert_eq!(trie.get(b"ab").unwrap(), None);
    assert_eq!(trie.get(b"abcd").unwrap(), Some(b"long".to_vec()));
}

#[test]
fn root_is_insertion_order_independent() {
    let entries: Vec<(&[u8], &[u8])> = vec![
        (b"doge", b"coin"),
        (b"dog", b"puppy"),
        (b"do", b"verb"),
        (b"horse", b"stallion"),
    ];

    let mut forward = empty_trie();
    for (k, v) in &entries {
        forward.put(k, v.to_vec()).unwrap();
    }

    let mut backward = empty_trie();
    for (k, v) in entries.iter().rev() {
        backward.put(k, v.to_vec()).unwrap();
    }

    assert_eq!(forward.root_hash(), backward.root_hash());
}

#[test]
fn delete_then_reinsert_restores_root() {
    let mut trie = empty_trie();
    trie.put(b"alpha", b"1".to_vec()).unwrap();
    trie.put(b"beta", b"2".to_vec()).unwrap();
    let root = trie.root_hash();

    trie.put(b"gamma", b"3".to_vec()).unwrap();
    trie.delete(b"gamma").unwrap();
    assert_eq!(trie.root_hash(), root);
}

#[test]
fn commit_and_reopen() {
    let mut source = MemoryNodeSource::new();
    let root;
    {
        let mut trie = Trie::new(None, source.clone());
        trie.put(b"k1", b"v1".to_vec()).unwrap();
        trie.put(b"k2", b"v2".to_vec()).unwrap();
        root = trie.root_hash();
        source.insert_all(trie.commit());
    }

    let reopened = Trie::new(Some(root), source);
    assert_eq!(reopened.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(reopened.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(reopened.root_hash(), root);
}

#[test]
fn mutation_over_persisted_state() {
    // Commit a tree, reopen from the root hash, then keep mutating across
    // hash-node boundaries.
    let mut source = MemoryNodeSource::new();
    let mut trie = Trie::new(None, source.clone());
    for i in 0u32..32 {
        trie.put(&i.to_le_bytes(), format!("value-{i}").into_bytes())
            .unwrap();
    }
    let root = trie.root_hash();
    source.insert_all(trie.commit());

    let mut reopened = Trie::new(Some(root), source);
    reopened.put(&7u32.to_le_bytes(), b"patched".to_vec()).unwrap();
    reopened.delete(&9u32.to_le_bytes()).unwrap();
    assert_eq!(
        reopened.get(&7u32.to_le_bytes()).unwrap(),
        Some(b"patched".to_vec())
    );
    assert_eq!(reopened.get(&9u32.to_le_bytes()).unwrap(), None);
    assert_eq!(
        reopened.get(&21u32.to_le_bytes()).unwrap(),
        Some(b"value-21".to_vec())
    );
    assert_ne!(reopened.root_hash(), root);
}

#[test]
fn proof_round_trip() {
    let mut trie = empty_trie();
    for i in 0u32..16 {
        trie.put(&i.to_le_bytes(), format!("v{i}").into_bytes())
            .unwrap();
    }
    let root = trie.root_hash();

    let proof = trie.get_proof(&5u32.to_le_bytes()).unwrap();
    let value = verify_proof(&root, &5u32.to_le_bytes(), &proof).unwrap();
    assert_eq!(value, Some(b"v5".to_vec()));
}

#[test]
fn tampered_proof_fails() {
    let mut trie = empty_trie();
    trie.put(b"key", b"value".to_vec()).unwrap();
    trie.put(b"kez", b"other".to_vec()).unwrap();
    let root = trie.root_hash();
    let proof = trie.get_proof(b"key").unwrap();

    for i in 0..proof.len() {
        for bit in [0x01u8, 0x80] {
            let mut tampered = proof.clone();
            let last = tampered[i].len() - 1;
            tampered[i][last] ^= bit;
            let result = verify_proof(&root, b"key", &tampered);
            // Either the chain breaks or the value changes; it must never
            // silently verify to the original value.
            if let Ok(Some(value)) = result {
                assert_ne!(value, b"value".to_vec());
            }
        }
    }
}

#[test]
fn proof_against_wrong_root_fails() {
    let mut trie = empty_trie();
    trie.put(b"key", b"value".to_vec()).unwrap();
    let proof = trie.get_proof(b"key").unwrap();
    let wrong_root = UInt256::hash(b"not the root");
    assert!(verify_proof(&wrong_root, b"key", &proof).is_err());
}

#[test]
fn identical_contents_identical_serialization() {
    // Two tries built differently but holding the same map must commit
    // byte-identical node sets.
    let mut a = empty_trie();
    a.put(b"x", b"1".to_vec()).unwrap();
    a.put(b"y", b"2".to_vec()).unwrap();
    a.put(b"z", b"3".to_vec()).unwrap();
    a.delete(b"z").unwrap();

    let mut b = empty_trie();
    b.put(b"y", b"2".to_vec()).unwrap();
    b.put(b"x", b"1".to_vec()).unwrap();

    let mut nodes_a = a.commit();
    let mut nodes_b = b.commit();
    nodes_a.sort();
    nodes_b.sort();
    assert_eq!(nodes_a, nodes_b);
}
