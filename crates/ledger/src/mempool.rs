//! The memory pool of unconfirmed transactions.

use neo2_core::{Fixed8, Transaction, UInt256};
use neo2_io::Serializable;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Fee oracle for pool admission and ordering. Implemented by the
/// blockchain engine, which can resolve inputs against the ledger.
pub trait Feer {
    /// Net utility-token fee attached to the transaction.
    fn network_fee(&self, tx: &Transaction) -> Fixed8;

    /// Whether the fee qualifies as low priority.
    fn is_low_priority(&self, fee: Fixed8) -> bool;
}

/// Ordering key: fee density first, then absolute fee, then hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PoolKey {
    fee_per_byte: i64,
    fee: i64,
    hash: UInt256,
}

/// An ordered pool of verified, unconfirmed transactions.
///
/// When full, the cheapest entry is evicted to make room for a better-paying
/// one; a transaction cheaper than the current minimum is rejected outright.
pub struct Mempool {
    capacity: usize,
    by_hash: HashMap<UInt256, (Transaction, PoolKey)>,
    ordered: BTreeSet<PoolKey>,
}

impl Mempool {
    /// Creates a pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Mempool {
            capacity,
            by_hash: HashMap::new(),
            ordered: BTreeSet::new(),
        }
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Whether the transaction is pooled.
    pub fn contains(&self, hash: &UInt256) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Adds a verified transaction. Returns `false` when the pool is full
    /// of better-paying entries or the transaction is already present.
    pub fn try_add(&mut self, tx: Transaction, feer: &dyn Feer) -> bool {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return false;
        }

        let fee = feer.network_fee(&tx);
        let size = tx.size().max(1);
        let key = PoolKey {
            fee_per_byte: fee.raw() / size as i64,
            fee: fee.raw(),
            hash,
        };

        if self.by_hash.len() >= self.capacity {
            let cheapest = self.ordered.first().cloned();
            match cheapest {
                Some(min) if min < key => {
                    self.ordered.remove(&min);
                    self.by_hash.remove(&min.hash);
                    debug!(evicted = %min.hash, "mempool full, evicting cheapest");
                }
                _ => return false,
            }
        }

        self.ordered.insert(key.clone());
        self.by_hash.insert(hash, (tx, key));
        true
    }

    /// Removes one transaction.
    pub fn remove(&mut self, hash: &UInt256) -> Option<Transaction> {
        let (tx, key) = self.by_hash.remove(hash)?;
        self.ordered.remove(&key);
        Some(tx)
    }

    /// Drops every transaction confirmed by the given block's hash list and
    /// re-verifies the remainder (inputs may have become spent).
    pub fn update_on_block<F>(&mut self, confirmed: &[UInt256], mut still_valid: F)
    where
        F: FnMut(&Transaction) -> bool,
    {
        for hash in confirmed {
            self.remove(hash);
        }
        let stale: Vec<UInt256> = self
            .by_hash
            .iter()
            .filter(|(_, (tx, _))| !still_valid(tx))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in stale {
            self.remove(&hash);
            debug!(tx = %hash, "dropping invalidated mempool entry");
        }
    }

    /// The best-paying transactions first, up to `limit`.
    pub fn take_verified(&self, limit: usize) -> Vec<Transaction> {
        self.ordered
            .iter()
            .rev()
            .take(limit)
            .filter_map(|key| self.by_hash.get(&key.hash).map(|(tx, _)| tx.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo2_core::transaction::TransactionData;

    struct FlatFee(i64);

    impl Feer for FlatFee {
        fn network_fee(&self, tx: &Transaction) -> Fixed8 {
            // Derive a deterministic fee from the miner nonce for tests.
            match tx.data {
                TransactionData::Miner { nonce } => Fixed8(self.0 + i64::from(nonce)),
                _ => Fixed8(self.0),
            }
        }

        fn is_low_priority(&self, fee: Fixed8) -> bool {
            fee < Fixed8(1000)
        }
    }

    fn tx(nonce: u32) -> Transaction {
        Transaction::new(0, TransactionData::Miner { nonce })
    }

    #[test]
    fn add_and_remove() {
        let mut pool = Mempool::new(10);
        let t = tx(1);
        assert!(pool.try_add(t.clone(), &FlatFee(100)));
        assert!(!pool.try_add(t.clone(), &FlatFee(100)));
        assert!(pool.contains(&t.hash()));
        assert_eq!(pool.remove(&t.hash()).unwrap(), t);
        assert!(pool.is_empty());
    }

    #[test]
    fn eviction_prefers_higher_fees() {
        let mut pool = Mempool::new(2);
        assert!(pool.try_add(tx(1), &FlatFee(0)));
        assert!(pool.try_add(tx(2), &FlatFee(0)));
        // Higher-fee tx evicts the cheapest.
        assert!(pool.try_add(tx(100), &FlatFee(0)));
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&tx(1).hash()));

        // A tx cheaper than everything pooled is rejected.
        assert!(!pool.try_add(tx(0), &FlatFee(0)));
    }

    #[test]
    fn block_update_removes_confirmed_and_stale() {
        let mut pool = Mempool::new(10);
        let a = tx(1);
        let b = tx(2);
        let c = tx(3);
        for t in [&a, &b, &c] {
            pool.try_add(t.clone(), &FlatFee(10));
        }
        // Block confirms `a`; `b` becomes invalid on re-verification.
        pool.update_on_block(&[a.hash()], |t| t.hash() != b.hash());
        assert!(!pool.contains(&a.hash()));
        assert!(!pool.contains(&b.hash()));
        assert!(pool.contains(&c.hash()));
    }

    #[test]
    fn take_verified_orders_by_fee() {
        let mut pool = Mempool::new(10);
        pool.try_add(tx(5), &FlatFee(0));
        pool.try_add(tx(50), &FlatFee(0));
        pool.try_add(tx(20), &FlatFee(0));
        let best = pool.take_verified(2);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].hash(), tx(50).hash());
    }
}
