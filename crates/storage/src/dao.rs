//! Typed data access over the KV store.
//!
//! [`SimpleDao`] reads and writes the store directly. [`CachedDao`] stacks
//! write-set layers on top: the bottom layer is the block's pending state,
//! pushed layers give nested contract calls snapshot-then-commit semantics,
//! and the merged set flushes as one atomic batch.

use crate::keys::{self, Prefix};
use crate::store::{Batch, Store};
use crate::{StorageError, StorageResult};
use neo2_core::state::{
    AccountState, AssetState, ContractState, SpentCoinState, StorageItem, UnspentCoinState,
    ValidatorState,
};
use neo2_core::{Transaction, TrimmedBlock, UInt160, UInt256};
use neo2_io::{BinaryWriter, MemoryReader, Serializable};
use std::collections::BTreeMap;
use std::sync::Arc;

type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Read-side typed accessors, shared by both DAO flavors.
pub trait DaoRead {
    /// Point read of the merged view.
    fn raw_get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Ordered prefix scan of the merged view.
    fn raw_seek(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    fn get_account(&self, hash: &UInt160) -> StorageResult<Option<AccountState>> {
        self.get_typed(&keys::hash160_key(Prefix::StAccount, hash))
    }

    /// The stored account, or a fresh empty one.
    fn get_account_or_new(&self, hash: &UInt160) -> StorageResult<AccountState> {
        Ok(self
            .get_account(hash)?
            .unwrap_or_else(|| AccountState::new(*hash)))
    }

    fn get_asset(&self, id: &UInt256) -> StorageResult<Option<AssetState>> {
        self.get_typed(&keys::hash256_key(Prefix::StAsset, id))
    }

    fn get_contract_state(&self, hash: &UInt160) -> StorageResult<Option<ContractState>> {
        self.get_typed(&keys::hash160_key(Prefix::StContract, hash))
    }

    fn get_unspent(&self, tx_hash: &UInt256) -> StorageResult<Option<UnspentCoinState>> {
        self.get_typed(&keys::hash256_key(Prefix::StCoin, tx_hash))
    }

    fn get_spent_coin(&self, tx_hash: &UInt256) -> StorageResult<Option<SpentCoinState>> {
        self.get_typed(&keys::hash256_key(Prefix::StSpentCoin, tx_hash))
    }

    fn get_validator(&self, public_key: &[u8; 33]) -> StorageResult<Option<ValidatorState>> {
        self.get_typed(&keys::validator_key(public_key))
    }

    /// Every registered validator record.
    fn get_validators(&self) -> StorageResult<Vec<ValidatorState>> {
        let mut out = Vec::new();
        for (_, bytes) in self.raw_seek(&[Prefix::StValidator as u8])? {
            out.push(neo2_io::from_bytes(&bytes)?);
        }
        Ok(out)
    }

    fn get_storage_item(
        &self,
        script_hash: &UInt160,
        key: &[u8],
    ) -> StorageResult<Option<StorageItem>> {
        self.get_typed(&keys::storage_item_key(script_hash, key))
    }

    /// Lazy cursor over a contract's storage items under `key_prefix`.
    fn find_storage_items(
        &self,
        script_hash: &UInt160,
        key_prefix: &[u8],
    ) -> StorageResult<StorageFindCursor> {
        let mut scan_prefix = keys::storage_scope_prefix(script_hash);
        scan_prefix.extend_from_slice(key_prefix);
        let scope_len = 21; // prefix byte + script hash
        let mut items = Vec::new();
        for (key, bytes) in self.raw_seek(&scan_prefix)? {
            let item: StorageItem = neo2_io::from_bytes(&bytes)?;
            items.push((key[scope_len..].to_vec(), item.value));
        }
        Ok(StorageFindCursor::new(items))
    }

    fn get_block(&self, hash: &UInt256) -> StorageResult<Option<TrimmedBlock>> {
        self.get_typed(&keys::hash256_key(Prefix::DataBlock, hash))
    }

    /// A stored transaction with the height it was confirmed at.
    fn get_transaction(&self, hash: &UInt256) -> StorageResult<Option<(u32, Transaction)>> {
        let Some(bytes) = self.raw_get(&keys::hash256_key(Prefix::DataTransaction, hash))? else {
            return Ok(None);
        };
        let mut reader = MemoryReader::new(&bytes);
        let height = reader.read_u32().map_err(StorageError::from)?;
        let tx = Transaction::deserialize(&mut reader).map_err(StorageError::from)?;
        Ok(Some((height, tx)))
    }

    fn has_transaction(&self, hash: &UInt256) -> StorageResult<bool> {
        Ok(self
            .raw_get(&keys::hash256_key(Prefix::DataTransaction, hash))?
            .is_some())
    }

    fn get_app_exec_result(&self, tx_hash: &UInt256) -> StorageResult<Option<Vec<u8>>> {
        self.raw_get(&keys::hash256_key(Prefix::StAppExecResult, tx_hash))
    }

    /// The `(hash, height)` pointer of the current tip, if any.
    fn get_current_block(&self) -> StorageResult<Option<(UInt256, u32)>> {
        let Some(bytes) = self.raw_get(&keys::current_block_key())? else {
            return Ok(None);
        };
        let mut reader = MemoryReader::new(&bytes);
        let hash: UInt256 = reader.read_serializable().map_err(StorageError::from)?;
        let height = reader.read_u32().map_err(StorageError::from)?;
        Ok(Some((hash, height)))
    }

    /// Current block height; `NotFound` when the store is uninitialized.
    fn get_current_block_height(&self) -> StorageResult<u32> {
        self.get_current_block()?
            .map(|(_, height)| height)
            .ok_or(StorageError::NotFound)
    }

    fn get_version(&self) -> StorageResult<Option<String>> {
        Ok(self
            .raw_get(&keys::version_key())?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    fn get_header_hash_page(&self, start: u32) -> StorageResult<Option<Vec<UInt256>>> {
        let Some(bytes) = self.raw_get(&keys::header_hash_page_key(start))? else {
            return Ok(None);
        };
        let mut reader = MemoryReader::new(&bytes);
        let hashes = reader
            .read_serializable_list(1 << 16)
            .map_err(StorageError::from)?;
        Ok(Some(hashes))
    }

    fn get_mpt_node(&self, hash: &UInt256) -> StorageResult<Option<Vec<u8>>> {
        self.raw_get(&keys::hash256_key(Prefix::DataMptNode, hash))
    }

    fn get_state_root(&self, height: u32) -> StorageResult<Option<Vec<u8>>> {
        self.raw_get(&keys::state_root_key(height))
    }

    /// Parses one typed record.
    fn get_typed<T: Serializable>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        match self.raw_get(key)? {
            Some(bytes) => Ok(Some(neo2_io::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Write-side typed accessors.
pub trait DaoWrite: DaoRead {
    /// Stages (or performs) a write.
    fn raw_put(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stages (or performs) a delete.
    fn raw_delete(&mut self, key: Vec<u8>) -> StorageResult<()>;

    fn put_account(&mut self, account: &AccountState) -> StorageResult<()> {
        self.put_typed(
            keys::hash160_key(Prefix::StAccount, &account.script_hash),
            account,
        )
    }

    fn put_asset(&mut self, asset: &AssetState) -> StorageResult<()> {
        self.put_typed(keys::hash256_key(Prefix::StAsset, &asset.id), asset)
    }

    fn put_contract_state(&mut self, contract: &ContractState) -> StorageResult<()> {
        self.put_typed(
            keys::hash160_key(Prefix::StContract, &contract.script_hash()),
            contract,
        )
    }

    fn delete_contract_state(&mut self, hash: &UInt160) -> StorageResult<()> {
        self.raw_delete(keys::hash160_key(Prefix::StContract, hash))
    }

    fn put_unspent(&mut self, tx_hash: &UInt256, unspent: &UnspentCoinState) -> StorageResult<()> {
        self.put_typed(keys::hash256_key(Prefix::StCoin, tx_hash), unspent)
    }

    fn put_spent_coin(&mut self, tx_hash: &UInt256, spent: &SpentCoinState) -> StorageResult<()> {
        self.put_typed(keys::hash256_key(Prefix::StSpentCoin, tx_hash), spent)
    }

    fn delete_spent_coin(&mut self, tx_hash: &UInt256) -> StorageResult<()> {
        self.raw_delete(keys::hash256_key(Prefix::StSpentCoin, tx_hash))
    }

    fn put_validator(&mut self, validator: &ValidatorState) -> StorageResult<()> {
        self.put_typed(keys::validator_key(&validator.public_key.to_bytes()), validator)
    }

    fn put_storage_item(
        &mut self,
        script_hash: &UInt160,
        key: &[u8],
        item: &StorageItem,
    ) -> StorageResult<()> {
        self.put_typed(keys::storage_item_key(script_hash, key), item)
    }

    fn delete_storage_item(&mut self, script_hash: &UInt160, key: &[u8]) -> StorageResult<()> {
        self.raw_delete(keys::storage_item_key(script_hash, key))
    }

    fn store_as_block(&mut self, block: &TrimmedBlock) -> StorageResult<()> {
        self.put_typed(keys::hash256_key(Prefix::DataBlock, &block.hash()), block)
    }

    fn store_as_transaction(&mut self, tx: &Transaction, height: u32) -> StorageResult<()> {
        let mut writer = BinaryWriter::new();
        writer.write_u32(height);
        tx.serialize(&mut writer);
        self.raw_put(
            keys::hash256_key(Prefix::DataTransaction, &tx.hash()),
            writer.into_bytes(),
        )
    }

    fn put_app_exec_result(&mut self, tx_hash: &UInt256, bytes: Vec<u8>) -> StorageResult<()> {
        self.raw_put(keys::hash256_key(Prefix::StAppExecResult, tx_hash), bytes)
    }

    fn put_current_block(&mut self, hash: &UInt256, height: u32) -> StorageResult<()> {
        let mut writer = BinaryWriter::new();
        writer.write_serializable(hash);
        writer.write_u32(height);
        self.raw_put(keys::current_block_key(), writer.into_bytes())
    }

    fn put_version(&mut self, version: &str) -> StorageResult<()> {
        self.raw_put(keys::version_key(), version.as_bytes().to_vec())
    }

    fn put_header_hash_page(&mut self, start: u32, hashes: &[UInt256]) -> StorageResult<()> {
        let mut writer = BinaryWriter::new();
        writer.write_serializable_list(hashes);
        self.raw_put(keys::header_hash_page_key(start), writer.into_bytes())
    }

    fn put_mpt_node(&mut self, hash: &UInt256, bytes: Vec<u8>) -> StorageResult<()> {
        self.raw_put(keys::hash256_key(Prefix::DataMptNode, hash), bytes)
    }

    fn put_state_root(&mut self, height: u32, bytes: Vec<u8>) -> StorageResult<()> {
        self.raw_put(keys::state_root_key(height), bytes)
    }

    /// Rewrites legacy NEP-5 balance records under the current layout:
    /// zero balances are dropped, survivors are re-keyed untouched.
    fn migrate_nep5_balances(&mut self) -> StorageResult<usize> {
        let records = self.raw_seek(&[Prefix::StNep5Balances as u8])?;
        let mut migrated = 0;
        for (key, bytes) in records {
            if bytes.iter().all(|b| *b == 0) {
                self.raw_delete(key)?;
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    /// Serializes and stages one typed record.
    fn put_typed<T: Serializable>(&mut self, key: Vec<u8>, value: &T) -> StorageResult<()> {
        self.raw_put(key, neo2_io::to_bytes(value))
    }
}

/// Direct store access with no write buffering. Each write is its own
/// atomic batch; use [`CachedDao`] wherever multiple writes must land
/// together.
#[derive(Clone)]
pub struct SimpleDao {
    store: Arc<dyn Store>,
}

impl SimpleDao {
    /// Wraps a store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        SimpleDao { store }
    }

    /// The underlying store handle.
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }
}

impl DaoRead for SimpleDao {
    fn raw_get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.store.get(key)
    }

    fn raw_seek(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.store.seek_prefix(prefix)
    }
}

impl DaoWrite for SimpleDao {
    fn raw_put(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut batch = Batch::new();
        batch.put(key, value);
        self.store.write_batch(batch)
    }

    fn raw_delete(&mut self, key: Vec<u8>) -> StorageResult<()> {
        let mut batch = Batch::new();
        batch.delete(key);
        self.store.write_batch(batch)
    }
}

/// A DAO with a stack of in-memory write-set layers over the store.
///
/// Reads see the newest write first. `push_layer` snapshots the state for a
/// nested call; `commit_layer` folds it into the parent, `discard_layer`
/// throws it away. The collapsed bottom layer becomes one atomic batch.
pub struct CachedDao {
    store: Arc<dyn Store>,
    layers: Vec<WriteSet>,
}

impl CachedDao {
    /// Opens a cached DAO with one empty layer.
    pub fn new(store: Arc<dyn Store>) -> Self {
        CachedDao {
            store,
            layers: vec![WriteSet::new()],
        }
    }

    /// The underlying store handle.
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Starts a nested snapshot for a contract call.
    pub fn push_layer(&mut self) {
        self.layers.push(WriteSet::new());
    }

    /// Folds the top layer into its parent.
    pub fn commit_layer(&mut self) {
        debug_assert!(self.layers.len() > 1, "cannot commit the base layer");
        if self.layers.len() > 1 {
            let top = self.layers.pop().expect("layer stack is never empty");
            let parent = self.layers.last_mut().expect("parent layer exists");
            for (key, value) in top {
                parent.insert(key, value);
            }
        }
    }

    /// Drops the top layer, discarding its writes.
    pub fn discard_layer(&mut self) {
        debug_assert!(self.layers.len() > 1, "cannot discard the base layer");
        if self.layers.len() > 1 {
            self.layers.pop();
        }
    }

    /// Number of stacked layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// The pending writes (and deletes, as `None`) under a key prefix,
    /// collapsed across layers. Used to feed the state trie.
    pub fn pending_entries(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        let mut merged: WriteSet = BTreeMap::new();
        for layer in &self.layers {
            for (key, value) in layer.range(prefix.to_vec()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                merged.insert(key.clone(), value.clone());
            }
        }
        merged.into_iter().collect()
    }

    /// Collapses every layer into one atomic batch, consuming the DAO.
    pub fn into_batch(mut self) -> Batch {
        while self.layers.len() > 1 {
            self.commit_layer();
        }
        let base = self.layers.pop().expect("base layer exists");
        let mut batch = Batch::new();
        for (key, value) in base {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }

    /// Collapses and writes everything as one atomic batch.
    pub fn flush(self) -> StorageResult<()> {
        let store = Arc::clone(&self.store);
        let batch = self.into_batch();
        tracing::debug!(ops = batch.len(), "flushing dao write-set");
        store.write_batch(batch)
    }
}

impl DaoRead for CachedDao {
    fn raw_get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        for layer in self.layers.iter().rev() {
            if let Some(entry) = layer.get(key) {
                return Ok(entry.clone());
            }
        }
        self.store.get(key)
    }

    fn raw_seek(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        // Overlay the layers onto the store view, newest last so it wins.
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .store
            .seek_prefix(prefix)?
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        for layer in &self.layers {
            for (key, value) in layer.range(prefix.to_vec()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                merged.insert(key.clone(), value.clone());
            }
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }
}

impl DaoWrite for CachedDao {
    fn raw_put(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.layers
            .last_mut()
            .expect("layer stack is never empty")
            .insert(key, Some(value));
        Ok(())
    }

    fn raw_delete(&mut self, key: Vec<u8>) -> StorageResult<()> {
        self.layers
            .last_mut()
            .expect("layer stack is never empty")
            .insert(key, None);
        Ok(())
    }
}

/// A forward-only cursor over found storage items.
#[derive(Debug, Clone)]
pub struct StorageFindCursor {
    items: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl StorageFindCursor {
    fn new(items: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        StorageFindCursor { items, position: 0 }
    }

    /// Advances; returns whether a current element exists.
    pub fn next(&mut self) -> bool {
        if self.position < self.items.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Key of the current element (valid after a successful `next`).
    pub fn key(&self) -> Option<&[u8]> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
            .map(|(k, _)| k.as_slice())
    }

    /// Value of the current element (valid after a successful `next`).
    pub fn value(&self) -> Option<&[u8]> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
            .map(|(_, v)| v.as_slice())
    }

    /// Remaining element count.
    pub fn remaining(&self) -> usize {
        self.items.len() - self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use neo2_core::state::StorageItem;
    use neo2_core::Fixed8;

    fn dao() -> CachedDao {
        CachedDao::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn reads_see_writes_before_flush() {
        let mut dao = dao();
        let hash = UInt160([7u8; 20]);
        let mut account = AccountState::new(hash);
        account.adjust_balance(UInt256::hash(b"neo"), Fixed8::from_int(5));
        dao.put_account(&account).unwrap();
        assert_eq!(dao.get_account(&hash).unwrap().unwrap(), account);
        // The store itself is untouched until flush.
        assert!(SimpleDao::new(dao.store())
            .get_account(&hash)
            .unwrap()
            .is_none());
    }

    #[test]
    fn flush_is_visible_in_store() {
        let mut dao = dao();
        let store = dao.store();
        dao.put_version("0.2.0").unwrap();
        dao.flush().unwrap();
        assert_eq!(
            SimpleDao::new(store).get_version().unwrap(),
            Some("0.2.0".into())
        );
    }

    #[test]
    fn nested_layer_discard_rolls_back() {
        let mut dao = dao();
        let script = UInt160([1u8; 20]);
        dao.put_storage_item(&script, b"kept", &StorageItem::new(b"1".to_vec()))
            .unwrap();
        dao.push_layer();
        dao.put_storage_item(&script, b"dropped", &StorageItem::new(b"2".to_vec()))
            .unwrap();
        dao.discard_layer();
        assert!(dao.get_storage_item(&script, b"kept").unwrap().is_some());
        assert!(dao.get_storage_item(&script, b"dropped").unwrap().is_none());
    }

    #[test]
    fn nested_layer_commit_keeps_writes() {
        let mut dao = dao();
        let script = UInt160([1u8; 20]);
        dao.push_layer();
        dao.put_storage_item(&script, b"inner", &StorageItem::new(b"v".to_vec()))
            .unwrap();
        dao.commit_layer();
        assert!(dao.get_storage_item(&script, b"inner").unwrap().is_some());
    }

    #[test]
    fn deletes_shadow_store_values() {
        let mut simple = SimpleDao::new(Arc::new(MemoryStore::new()));
        let script = UInt160([1u8; 20]);
        simple
            .put_storage_item(&script, b"k", &StorageItem::new(b"v".to_vec()))
            .unwrap();

        let mut dao = CachedDao::new(simple.store());
        dao.delete_storage_item(&script, b"k").unwrap();
        assert!(dao.get_storage_item(&script, b"k").unwrap().is_none());
        // Seek also honors the pending delete.
        let cursor = dao.find_storage_items(&script, b"").unwrap();
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn find_storage_items_strips_scope_and_orders() {
        let mut dao = dao();
        let script = UInt160([9u8; 20]);
        for key in [b"b".as_slice(), b"a", b"ab"] {
            dao.put_storage_item(&script, key, &StorageItem::new(key.to_vec()))
                .unwrap();
        }
        let mut cursor = dao.find_storage_items(&script, b"a").unwrap();
        assert_eq!(cursor.remaining(), 2);
        assert!(cursor.next());
        assert_eq!(cursor.key(), Some(b"a".as_slice()));
        assert!(cursor.next());
        assert_eq!(cursor.key(), Some(b"ab".as_slice()));
        assert!(!cursor.next());
    }

    #[test]
    fn transaction_round_trip_with_height() {
        use neo2_core::transaction::TransactionData;
        let mut dao = dao();
        let tx = Transaction::new(0, TransactionData::Miner { nonce: 7 });
        dao.store_as_transaction(&tx, 42).unwrap();
        let (height, stored) = dao.get_transaction(&tx.hash()).unwrap().unwrap();
        assert_eq!(height, 42);
        assert_eq!(stored, tx);
        assert!(dao.has_transaction(&tx.hash()).unwrap());
    }

    #[test]
    fn current_block_height_not_found_when_empty() {
        let dao = dao();
        assert!(matches!(
            dao.get_current_block_height(),
            Err(StorageError::NotFound)
        ));
    }
}
