//! The blockchain engine: validation, application, state-root commitment.

use crate::genesis;
use crate::interop::InteropContext;
use crate::mempool::{Feer, Mempool};
use crate::results::{AppExecResult, NotificationEvent, TriggerType};
use crate::{LedgerError, LedgerResult};
use neo2_core::state::{SpentCoinState, UnspentCoinState};
use neo2_core::transaction::{Input, Output, TransactionData, TransactionType};
use neo2_core::{
    Block, Fixed8, HeaderHashList, NetworkParams, Transaction, UInt160, UInt256, Witness,
    MAX_TRANSACTION_SIZE,
};
use neo2_io::{BinaryWriter, Serializable};
use neo2_mpt::{NodeSource, Trie};
use neo2_storage::{CachedDao, DaoRead, DaoWrite, Prefix, SimpleDao, Store};
use neo2_vm::{ExecutionEngine, VMState};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// One engine gas unit is 0.001 GAS.
const GAS_UNIT_RAW: i64 = 100_000;
/// Gas granted to every invocation on top of what the transaction paid.
const FREE_GAS_UNITS: i64 = 10_000;
/// Gas cap for witness verification runs.
const VERIFICATION_GAS_UNITS: i64 = 500_000;
/// Utility generated per governing token per block (simplified flat era).
const GAS_PER_NEO_PER_BLOCK_RAW: i64 = 8;
/// Header hashes are persisted in pages of this many entries.
const HEADER_PAGE_SIZE: usize = 2000;
/// Blocks an asset registration stays valid for.
const ASSET_LIFETIME_BLOCKS: u32 = 2_000_000;

/// Announcement of an accepted block.
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub hash: UInt256,
    pub height: u32,
    pub state_root: UInt256,
}

/// The capability surface other subsystems (block queue, consensus) use.
pub trait Blockchainer: Send + Sync {
    /// Height of the current tip.
    fn block_height(&self) -> u32;

    /// Hash of the current tip.
    fn current_hash(&self) -> UInt256;

    /// Header hash at a height, when stored.
    fn header_hash(&self, index: u32) -> Option<UInt256>;

    /// State root after the current tip.
    fn current_state_root(&self) -> UInt256;

    /// Network parameters.
    fn params(&self) -> &NetworkParams;

    /// Validates and applies the next block.
    fn add_block(&self, block: Block) -> LedgerResult<()>;

    /// Fetches a stored block with its transactions.
    fn get_block(&self, hash: &UInt256) -> LedgerResult<Option<Block>>;

    /// Verifies a transaction against current state.
    fn verify_transaction(&self, tx: &Transaction) -> LedgerResult<()>;

    /// Best-paying pooled transactions, for block proposals.
    fn pooled_transactions(&self, limit: usize) -> Vec<Transaction>;
}

struct Inner {
    header_hashes: HeaderHashList,
    state_root: UInt256,
}

/// The engine. `add_block` mutations are serialized behind a write lock;
/// readers take consistent snapshots through the store.
pub struct Blockchain {
    store: Arc<dyn Store>,
    params: NetworkParams,
    inner: RwLock<Inner>,
    mempool: Mutex<Mempool>,
    events: broadcast::Sender<BlockEvent>,
    governing_asset: UInt256,
    utility_asset: UInt256,
}

impl Blockchain {
    /// Opens (or bootstraps) a chain over the given store.
    pub fn new(store: Arc<dyn Store>, params: NetworkParams) -> LedgerResult<Self> {
        let (events, _) = broadcast::channel(64);
        let chain = Blockchain {
            store,
            governing_asset: genesis::governing_token_tx().hash(),
            utility_asset: genesis::utility_token_tx().hash(),
            params,
            inner: RwLock::new(Inner {
                header_hashes: HeaderHashList::default(),
                state_root: UInt256::zero(),
            }),
            mempool: Mutex::new(Mempool::new(50_000)),
            events,
        };

        let dao = SimpleDao::new(Arc::clone(&chain.store));
        match dao.get_current_block()? {
            None => {
                let genesis_block = genesis::genesis_block(&chain.params);
                info!(hash = %genesis_block.hash(), "bootstrapping chain from genesis");
                chain.store_block(&genesis_block)?;
            }
            Some((tip_hash, height)) => {
                chain.load_header_hashes(&dao, tip_hash, height)?;
                let mut inner = chain.inner.write();
                if let Some(bytes) = dao.get_state_root(height)? {
                    inner.state_root = parse_state_root(&bytes)?;
                }
                info!(height, tip = %tip_hash, "chain state loaded");
            }
        }
        Ok(chain)
    }

    /// Subscribes to accepted-block events.
    pub fn subscribe(&self) -> broadcast::Receiver<BlockEvent> {
        self.events.subscribe()
    }

    /// Hash of the native governing asset.
    pub fn governing_asset_id(&self) -> UInt256 {
        self.governing_asset
    }

    /// Hash of the native utility asset.
    pub fn utility_asset_id(&self) -> UInt256 {
        self.utility_asset
    }

    /// A read DAO over the backing store.
    pub fn dao(&self) -> SimpleDao {
        SimpleDao::new(Arc::clone(&self.store))
    }

    /// Fetches a stored transaction.
    pub fn get_transaction(&self, hash: &UInt256) -> LedgerResult<Option<(u32, Transaction)>> {
        Ok(self.dao().get_transaction(hash)?)
    }

    /// Fetches the stored execution result of an invocation.
    pub fn get_app_exec_result(&self, tx_hash: &UInt256) -> LedgerResult<Option<AppExecResult>> {
        match self.dao().get_app_exec_result(tx_hash)? {
            Some(bytes) => Ok(Some(neo2_io::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads one contract storage value.
    pub fn get_storage_value(
        &self,
        script_hash: &UInt160,
        key: &[u8],
    ) -> LedgerResult<Option<Vec<u8>>> {
        Ok(self
            .dao()
            .get_storage_item(script_hash, key)?
            .map(|item| item.value))
    }

    /// The persisted state root at a height.
    pub fn state_root(&self, height: u32) -> LedgerResult<Option<UInt256>> {
        match self.dao().get_state_root(height)? {
            Some(bytes) => Ok(Some(parse_state_root(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Admits a transaction to the mempool after verification.
    pub fn pool_transaction(&self, tx: Transaction) -> LedgerResult<()> {
        self.verify_transaction(&tx)?;
        let added = self.mempool.lock().try_add(tx, self);
        if !added {
            return Err(LedgerError::validation("mempool rejected transaction"));
        }
        Ok(())
    }

    /// Number of pooled transactions.
    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    // ---- bootstrap helpers -----------------------------------------------

    fn load_header_hashes(
        &self,
        dao: &SimpleDao,
        tip_hash: UInt256,
        height: u32,
    ) -> LedgerResult<()> {
        let mut hashes = Vec::new();
        let mut page_start = 0u32;
        while let Some(page) = dao.get_header_hash_page(page_start)? {
            let len = page.len() as u32;
            hashes.extend(page);
            page_start += len;
        }

        // Walk the unpaged tail backwards from the tip via prev links.
        let mut tail = Vec::new();
        let mut cursor = tip_hash;
        let mut cursor_height = height;
        while cursor_height + 1 > page_start {
            let block = dao
                .get_block(&cursor)?
                .ok_or_else(|| LedgerError::validation(format!("missing block {cursor}")))?;
            tail.push(cursor);
            if cursor_height == 0 {
                break;
            }
            cursor = block.base.prev_hash;
            cursor_height -= 1;
        }
        tail.reverse();
        hashes.extend(tail);

        let mut inner = self.inner.write();
        inner.header_hashes = HeaderHashList::new(hashes);
        Ok(())
    }

    // ---- verification ----------------------------------------------------

    fn resolve_output(dao: &CachedDao, input: &Input) -> Option<(Output, bool)> {
        let unspent = dao.get_unspent(&input.prev_hash).ok().flatten()?;
        let state = unspent.states.get(input.prev_index as usize)?;
        Some((state.output.clone(), state.is_spent()))
    }

    fn verify_tx_against(
        &self,
        dao: &mut CachedDao,
        header_hashes: &HeaderHashList,
        tx: &Transaction,
    ) -> LedgerResult<()> {
        if tx.size() > MAX_TRANSACTION_SIZE {
            return Err(LedgerError::validation("transaction exceeds size cap"));
        }
        if tx.has_duplicate_inputs() {
            return Err(LedgerError::validation("duplicate inputs"));
        }
        for input in &tx.inputs {
            if input.prev_hash == tx.hash() {
                return Err(LedgerError::validation("self-referencing input"));
            }
        }

        // Resolve inputs to their unspent outputs.
        let mut in_sums: BTreeMap<UInt256, Fixed8> = BTreeMap::new();
        for input in &tx.inputs {
            let (output, spent) = Self::resolve_output(dao, input).ok_or_else(|| {
                LedgerError::validation(format!(
                    "input {}:{} does not resolve",
                    input.prev_hash, input.prev_index
                ))
            })?;
            if spent {
                return Err(LedgerError::validation(format!(
                    "input {}:{} already spent",
                    input.prev_hash, input.prev_index
                )));
            }
            *in_sums.entry(output.asset_id).or_default() += output.amount;
        }

        let out_sums = tx.outputs_per_asset();
        for output in &tx.outputs {
            if output.amount <= Fixed8::ZERO {
                return Err(LedgerError::validation("non-positive output amount"));
            }
        }

        let assets: BTreeSet<UInt256> = in_sums.keys().chain(out_sums.keys()).copied().collect();
        for asset in assets {
            let incoming = in_sums.get(&asset).copied().unwrap_or_default();
            let outgoing = out_sums.get(&asset).copied().unwrap_or_default();
            if outgoing > incoming {
                let created = outgoing - incoming;
                match tx.tx_type() {
                    TransactionType::Issue => {
                        let state = dao
                            .get_asset(&asset)?
                            .ok_or_else(|| LedgerError::validation("issuing unknown asset"))?;
                        if created > state.issuable() {
                            return Err(LedgerError::validation("issue exceeds registered amount"));
                        }
                    }
                    TransactionType::Miner | TransactionType::Claim => {
                        if asset != self.utility_asset {
                            return Err(LedgerError::validation(
                                "only the utility asset may be generated",
                            ));
                        }
                    }
                    _ => {
                        return Err(LedgerError::validation("outputs exceed inputs"));
                    }
                }
            } else if incoming > outgoing && asset != self.utility_asset {
                // Only the utility asset is consumed as fees.
                return Err(LedgerError::validation("non-fee asset value destroyed"));
            }
        }

        if let TransactionData::Claim { claims } = &tx.data {
            self.verify_claims(dao, claims, &in_sums, &out_sums)?;
        }

        self.verify_witnesses(dao, header_hashes, tx)?;
        Ok(())
    }

    fn verify_claims(
        &self,
        dao: &CachedDao,
        claims: &[Input],
        in_sums: &BTreeMap<UInt256, Fixed8>,
        out_sums: &BTreeMap<UInt256, Fixed8>,
    ) -> LedgerResult<()> {
        let mut seen = BTreeSet::new();
        let mut bonus = Fixed8::ZERO;
        for claim in claims {
            if !seen.insert((claim.prev_hash, claim.prev_index)) {
                return Err(LedgerError::validation("duplicate claim"));
            }
            let spent = dao
                .get_spent_coin(&claim.prev_hash)?
                .ok_or_else(|| LedgerError::validation("claim references unspent coin"))?;
            let spend_height = spent
                .items
                .iter()
                .find(|(index, _)| *index == claim.prev_index)
                .map(|(_, height)| *height)
                .ok_or_else(|| LedgerError::validation("claim output not recorded as spent"))?;
            let unspent = dao
                .get_unspent(&claim.prev_hash)?
                .ok_or_else(|| LedgerError::validation("claim coin missing"))?;
            let output = unspent
                .states
                .get(claim.prev_index as usize)
                .map(|s| s.output.clone())
                .ok_or_else(|| LedgerError::validation("claim index out of range"))?;
            let blocks = i64::from(spend_height.saturating_sub(spent.height));
            let neo_count = output.amount.raw() / 100_000_000;
            bonus += Fixed8(blocks * GAS_PER_NEO_PER_BLOCK_RAW * neo_count);
        }
        let claimed = out_sums.get(&self.utility_asset).copied().unwrap_or_default()
            - in_sums.get(&self.utility_asset).copied().unwrap_or_default();
        if claimed > bonus {
            return Err(LedgerError::validation("claim exceeds generated amount"));
        }
        Ok(())
    }

    fn verify_witnesses(
        &self,
        dao: &mut CachedDao,
        header_hashes: &HeaderHashList,
        tx: &Transaction,
    ) -> LedgerResult<()> {
        let mut hashes = tx
            .script_hashes_for_verifying(|input| {
                Self::resolve_output(dao, input).map(|(output, _)| output)
            })
            .map_err(|e| LedgerError::validation(e.to_string()))?;
        // Issuing an asset additionally needs its issuer's signature.
        if tx.tx_type() == TransactionType::Issue {
            for asset_id in tx.outputs_per_asset().keys() {
                if let Some(asset) = dao.get_asset(asset_id)? {
                    hashes.insert(asset.issuer);
                }
            }
        }
        if hashes.len() != tx.scripts.len() {
            return Err(LedgerError::validation(format!(
                "expected {} witnesses, got {}",
                hashes.len(),
                tx.scripts.len()
            )));
        }
        let digest = neo2_crypto::double_sha256(&tx.unsigned_bytes());
        for (expected, witness) in hashes.iter().zip(tx.scripts.iter()) {
            if !self.verify_witness(dao, header_hashes, &digest, witness, expected, Some(tx))? {
                return Err(LedgerError::validation(format!(
                    "witness for {expected} failed verification"
                )));
            }
        }
        Ok(())
    }

    /// Runs one witness: invocation script first, then verification script;
    /// the machine must halt with a single truthy result.
    fn verify_witness(
        &self,
        dao: &mut CachedDao,
        header_hashes: &HeaderHashList,
        digest: &[u8; 32],
        witness: &Witness,
        expected: &UInt160,
        tx: Option<&Transaction>,
    ) -> LedgerResult<bool> {
        let verification = if witness.verification_script.is_empty() {
            // Deployed-contract witness: the script comes from the ledger.
            match dao.get_contract_state(expected)? {
                Some(contract) => contract.script,
                None => return Ok(false),
            }
        } else {
            if &witness.script_hash() != expected {
                return Ok(false);
            }
            witness.verification_script.clone()
        };

        let chain_height = header_hashes.len().saturating_sub(1) as u32;
        let mut engine = ExecutionEngine::new();
        engine.set_checked_hash(*digest);
        engine.set_gas_limit(VERIFICATION_GAS_UNITS);
        if engine.load_script(verification).is_err() {
            return Ok(false);
        }
        if !witness.invocation_script.is_empty()
            && engine.load_script(witness.invocation_script.clone()).is_err()
        {
            return Ok(false);
        }

        let mut context = InteropContext::new(
            TriggerType::Verification,
            tx,
            dao,
            chain_height,
            header_hashes,
            0,
            BTreeSet::new(),
        );
        let state = engine.execute(&mut context);
        drop(context);

        if state != VMState::Halt {
            return Ok(false);
        }
        let results = engine.result_stack();
        if results.len() != 1 {
            return Ok(false);
        }
        Ok(engine.arena().to_bool(&results[0]))
    }

    // ---- application -----------------------------------------------------

    /// Applies a block assuming verification already passed. Used for both
    /// genesis and validated blocks.
    fn store_block(&self, block: &Block) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        self.store_block_locked(&mut inner, block)
    }

    fn store_block_locked(&self, inner: &mut Inner, block: &Block) -> LedgerResult<()> {
        let height = block.index();
        let mut dao = CachedDao::new(Arc::clone(&self.store));

        for tx in &block.transactions {
            if height > 0 {
                self.verify_tx_against(&mut dao, &inner.header_hashes, tx)
                    .map_err(|e| LedgerError::validation(format!("tx {}: {e}", tx.hash())))?;
            }
            self.apply_transaction(&mut dao, &inner.header_hashes, tx, block)?;
        }

        // Fold the block's storage mutations into the state trie.
        let previous_root = inner.state_root;
        let (new_root, trie_nodes) = {
            let source = DaoNodeSource { dao: &dao };
            let root = if previous_root.is_zero() {
                None
            } else {
                Some(previous_root)
            };
            let mut trie = Trie::new(root, source);
            for (key, value) in dao.pending_entries(&[Prefix::StStorage as u8]) {
                match value {
                    Some(bytes) => trie.put(&key[1..], bytes)?,
                    None => trie.delete(&key[1..])?,
                }
            }
            (trie.root_hash(), trie.commit())
        };
        for (hash, bytes) in trie_nodes {
            dao.put_mpt_node(&hash, bytes)?;
        }
        dao.put_state_root(height, state_root_record(height, &new_root))?;

        dao.store_as_block(&block.trim())?;
        dao.put_current_block(&block.hash(), height)?;

        // Persist a full page of header hashes on the page boundary.
        let total_after = inner.header_hashes.len() + 1;
        if total_after % HEADER_PAGE_SIZE == 0 {
            let start = total_after - HEADER_PAGE_SIZE;
            let mut page: Vec<UInt256> = (start..total_after - 1)
                .filter_map(|i| inner.header_hashes.get(i))
                .collect();
            page.push(block.hash());
            dao.put_header_hash_page(start as u32, &page)?;
        }

        // One atomic batch; on failure the store is untouched.
        dao.flush()?;

        inner.header_hashes.add(block.hash());
        inner.state_root = new_root;

        let confirmed: Vec<UInt256> = block.transactions.iter().map(|tx| tx.hash()).collect();
        let dao_for_reverify = SimpleDao::new(Arc::clone(&self.store));
        self.mempool.lock().update_on_block(&confirmed, |tx| {
            tx.inputs.iter().all(|input| {
                dao_for_reverify
                    .get_unspent(&input.prev_hash)
                    .ok()
                    .flatten()
                    .and_then(|u| u.states.get(input.prev_index as usize).map(|s| !s.is_spent()))
                    .unwrap_or(false)
            })
        });

        let _ = self.events.send(BlockEvent {
            hash: block.hash(),
            height,
            state_root: new_root,
        });
        info!(height, hash = %block.hash(), root = %new_root, txs = block.transactions.len(), "block persisted");
        Ok(())
    }

    fn apply_transaction(
        &self,
        dao: &mut CachedDao,
        header_hashes: &HeaderHashList,
        tx: &Transaction,
        block: &Block,
    ) -> LedgerResult<()> {
        let height = block.index();
        let tx_hash = tx.hash();
        dao.store_as_transaction(tx, height)?;

        // New outputs become unspent coins and credit balances.
        if !tx.outputs.is_empty() {
            dao.put_unspent(&tx_hash, &UnspentCoinState::new(height, &tx.outputs))?;
            for output in &tx.outputs {
                let mut account = dao.get_account_or_new(&output.script_hash)?;
                account.adjust_balance(output.asset_id, output.amount);
                dao.put_account(&account)?;
            }
        }

        // Inputs are marked spent and debit balances.
        let mut by_prev: BTreeMap<UInt256, Vec<u16>> = BTreeMap::new();
        for input in &tx.inputs {
            by_prev.entry(input.prev_hash).or_default().push(input.prev_index);
        }
        for (prev_hash, indexes) in by_prev {
            let mut unspent = dao
                .get_unspent(&prev_hash)?
                .ok_or_else(|| LedgerError::validation("spending unknown coin"))?;
            let mut spent_record = dao.get_spent_coin(&prev_hash)?.unwrap_or(SpentCoinState {
                height: unspent.height,
                items: Vec::new(),
            });
            let mut touched_spent_record = false;
            for index in indexes {
                let state = unspent
                    .states
                    .get_mut(index as usize)
                    .ok_or_else(|| LedgerError::validation("spending unknown output index"))?;
                state.spend(height);
                let output = state.output.clone();
                let mut account = dao.get_account_or_new(&output.script_hash)?;
                account.adjust_balance(output.asset_id, -output.amount);
                dao.put_account(&account)?;
                // Spent governing coins become claimable.
                if output.asset_id == self.governing_asset {
                    spent_record.record(index, height);
                    touched_spent_record = true;
                }
            }
            dao.put_unspent(&prev_hash, &unspent)?;
            if touched_spent_record {
                dao.put_spent_coin(&prev_hash, &spent_record)?;
            }
        }

        match &tx.data {
            TransactionData::Register {
                asset_type,
                name,
                amount,
                precision,
                owner,
                admin,
            } => {
                let asset = neo2_core::state::AssetState {
                    id: tx_hash,
                    asset_type: *asset_type,
                    name: name.clone(),
                    amount: *amount,
                    available: Fixed8::ZERO,
                    precision: *precision,
                    fee: Fixed8::ZERO,
                    fee_address: UInt160::zero(),
                    owner: *owner,
                    admin: *admin,
                    issuer: *admin,
                    expiration: height.saturating_add(ASSET_LIFETIME_BLOCKS),
                    is_frozen: false,
                };
                dao.put_asset(&asset)?;
            }
            TransactionData::Issue => {
                for (asset_id, amount) in tx.outputs_per_asset() {
                    if let Some(mut asset) = dao.get_asset(&asset_id)? {
                        asset.available += amount;
                        dao.put_asset(&asset)?;
                    }
                }
            }
            TransactionData::Claim { claims } => {
                for claim in claims {
                    if let Some(mut spent) = dao.get_spent_coin(&claim.prev_hash)? {
                        spent.claim(claim.prev_index);
                        if spent.items.is_empty() {
                            dao.delete_spent_coin(&claim.prev_hash)?;
                        } else {
                            dao.put_spent_coin(&claim.prev_hash, &spent)?;
                        }
                    }
                }
            }
            TransactionData::Enrollment { public_key } => {
                dao.put_validator(&neo2_core::state::ValidatorState::new(*public_key))?;
            }
            TransactionData::Publish {
                script,
                param_list,
                return_type,
                needs_storage,
                name,
                code_version,
                author,
                email,
                description,
            } => {
                let mut properties = neo2_core::state::ContractProperties::empty();
                if *needs_storage {
                    properties |= neo2_core::state::ContractProperties::HAS_STORAGE;
                }
                dao.put_contract_state(&neo2_core::state::ContractState {
                    script: script.clone(),
                    param_list: param_list.clone(),
                    return_type: *return_type,
                    properties,
                    name: name.clone(),
                    code_version: code_version.clone(),
                    author: author.clone(),
                    email: email.clone(),
                    description: description.clone(),
                })?;
            }
            TransactionData::State { descriptors } => {
                for descriptor in descriptors {
                    self.apply_state_descriptor(dao, descriptor)?;
                }
            }
            TransactionData::Invocation { script, gas } => {
                let result =
                    self.execute_invocation(dao, header_hashes, tx, block, script, *gas)?;
                dao.put_app_exec_result(&tx_hash, neo2_io::to_bytes(&result))?;
            }
            TransactionData::Miner { .. } | TransactionData::Contract => {}
        }
        Ok(())
    }

    fn apply_state_descriptor(
        &self,
        dao: &mut CachedDao,
        descriptor: &neo2_core::transaction::StateDescriptor,
    ) -> LedgerResult<()> {
        use neo2_core::transaction::StateDescriptorType;
        match descriptor.descriptor_type {
            StateDescriptorType::Account => {
                if descriptor.field == "Votes" {
                    let hash = UInt160::from_bytes(&descriptor.key)
                        .map_err(|e| LedgerError::validation(e.to_string()))?;
                    let mut account = dao.get_account_or_new(&hash)?;
                    account.votes = descriptor
                        .value
                        .chunks(33)
                        .filter(|chunk| chunk.len() == 33)
                        .filter_map(|chunk| neo2_crypto::PublicKey::from_bytes(chunk).ok())
                        .collect();
                    dao.put_account(&account)?;
                }
            }
            StateDescriptorType::Validator => {
                if descriptor.field == "Registered" {
                    let key = neo2_crypto::PublicKey::from_bytes(&descriptor.key)
                        .map_err(|e| LedgerError::validation(e.to_string()))?;
                    let mut validator = dao
                        .get_validator(&key.to_bytes())?
                        .unwrap_or_else(|| neo2_core::state::ValidatorState::new(key));
                    validator.registered = descriptor.value.first().copied() == Some(1);
                    dao.put_validator(&validator)?;
                }
            }
        }
        Ok(())
    }

    fn execute_invocation(
        &self,
        dao: &mut CachedDao,
        header_hashes: &HeaderHashList,
        tx: &Transaction,
        block: &Block,
        script: &[u8],
        gas: Fixed8,
    ) -> LedgerResult<AppExecResult> {
        let witnesses = tx
            .script_hashes_for_verifying(|input| {
                Self::resolve_output(dao, input).map(|(output, _)| output)
            })
            .unwrap_or_default();

        // Invocation effects are isolated in their own layer: a fault
        // discards them while the transaction itself stays applied. A fault
        // inside a nested call can leave deeper layers open, so unwinding
        // goes back to this depth.
        let base_depth = dao.depth();
        dao.push_layer();

        let mut engine = ExecutionEngine::new();
        engine.set_gas_limit(gas.raw().max(0) / GAS_UNIT_RAW + FREE_GAS_UNITS);
        let mut context = InteropContext::new(
            TriggerType::Application,
            Some(tx),
            dao,
            block.index().saturating_sub(1),
            header_hashes,
            block.base.timestamp,
            witnesses,
        );

        let state = match engine.load_script(script.to_vec()) {
            Ok(()) => engine.execute(&mut context),
            Err(_) => VMState::Fault,
        };
        let notifications: Vec<NotificationEvent> = std::mem::take(&mut context.notifications);
        drop(context);

        let (vm_state, events) = match state {
            VMState::Halt => {
                while dao.depth() > base_depth {
                    dao.commit_layer();
                }
                (VMState::Halt, notifications)
            }
            _ => {
                while dao.depth() > base_depth {
                    dao.discard_layer();
                }
                debug!(tx = %tx.hash(), "invocation faulted, effects discarded");
                (VMState::Fault, Vec::new())
            }
        };

        let stack = engine
            .result_stack()
            .iter()
            .map(|item| {
                neo2_vm::serialization::serialize_item(engine.arena(), item).unwrap_or_default()
            })
            .collect();

        Ok(AppExecResult {
            tx_hash: tx.hash(),
            trigger: TriggerType::Application,
            vm_state,
            gas_consumed: Fixed8(engine.gas_consumed().saturating_mul(GAS_UNIT_RAW)),
            stack,
            events,
        })
    }
}

impl Blockchainer for Blockchain {
    fn block_height(&self) -> u32 {
        self.inner.read().header_hashes.len().saturating_sub(1) as u32
    }

    fn current_hash(&self) -> UInt256 {
        self.inner.read().header_hashes.last().unwrap_or_else(UInt256::zero)
    }

    fn header_hash(&self, index: u32) -> Option<UInt256> {
        self.inner.read().header_hashes.get(index as usize)
    }

    fn current_state_root(&self) -> UInt256 {
        self.inner.read().state_root
    }

    fn params(&self) -> &NetworkParams {
        &self.params
    }

    fn add_block(&self, block: Block) -> LedgerResult<()> {
        let mut inner = self.inner.write();
        let height = inner.header_hashes.len().saturating_sub(1) as u32;
        let tip = inner.header_hashes.last().unwrap_or_else(UInt256::zero);

        if block.index() != height + 1 {
            return Err(LedgerError::validation(format!(
                "block index {} does not extend height {height}",
                block.index()
            )));
        }
        if block.base.prev_hash != tip {
            return Err(LedgerError::validation("previous hash mismatch"));
        }
        block.verify_structure()?;

        // In-block double spends: every input must be unique across the
        // whole block.
        let mut inputs_seen = BTreeSet::new();
        for tx in &block.transactions {
            for input in &tx.inputs {
                if !inputs_seen.insert((input.prev_hash, input.prev_index)) {
                    return Err(LedgerError::validation("conflicting inputs within block"));
                }
            }
        }

        // The block witness must satisfy the consensus address committed by
        // the previous block.
        let prev_block = self
            .dao()
            .get_block(&tip)?
            .ok_or_else(|| LedgerError::validation("tip block missing from store"))?;
        let digest = neo2_crypto::double_sha256(&block.base.unsigned_bytes());
        let mut scratch = CachedDao::new(Arc::clone(&self.store));
        let witness_ok = self.verify_block_witness(
            &mut scratch,
            &digest,
            &block.base.script,
            &prev_block.base.next_consensus,
        )?;
        if !witness_ok {
            warn!(hash = %block.hash(), "block witness rejected");
            return Err(LedgerError::validation("invalid block witness"));
        }

        self.store_block_locked(&mut inner, &block)
    }

    fn get_block(&self, hash: &UInt256) -> LedgerResult<Option<Block>> {
        let dao = self.dao();
        let Some(trimmed) = dao.get_block(hash)? else {
            return Ok(None);
        };
        let block = trimmed
            .into_block(|tx_hash| {
                dao.get_transaction(tx_hash).ok().flatten().map(|(_, tx)| tx)
            })
            .map_err(|e| LedgerError::validation(e.to_string()))?;
        Ok(Some(block))
    }

    fn verify_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        let inner = self.inner.read();
        let mut dao = CachedDao::new(Arc::clone(&self.store));
        self.verify_tx_against(&mut dao, &inner.header_hashes, tx)
    }

    fn pooled_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.lock().take_verified(limit)
    }
}

impl Blockchain {
    /// Block-witness verification without taking the inner lock (the caller
    /// already holds it).
    fn verify_block_witness(
        &self,
        dao: &mut CachedDao,
        digest: &[u8; 32],
        witness: &Witness,
        expected: &UInt160,
    ) -> LedgerResult<bool> {
        if witness.verification_script.is_empty() {
            return Ok(false);
        }
        if &witness.script_hash() != expected {
            return Ok(false);
        }
        let mut engine = ExecutionEngine::new();
        engine.set_checked_hash(*digest);
        engine.set_gas_limit(VERIFICATION_GAS_UNITS);
        if engine.load_script(witness.verification_script.clone()).is_err() {
            return Ok(false);
        }
        if !witness.invocation_script.is_empty()
            && engine.load_script(witness.invocation_script.clone()).is_err()
        {
            return Ok(false);
        }
        let header_hashes = HeaderHashList::default();
        let mut context = InteropContext::new(
            TriggerType::Verification,
            None,
            dao,
            0,
            &header_hashes,
            0,
            BTreeSet::new(),
        );
        let state = engine.execute(&mut context);
        drop(context);
        if state != VMState::Halt {
            return Ok(false);
        }
        let results = engine.result_stack();
        Ok(results.len() == 1 && engine.arena().to_bool(&results[0]))
    }
}

impl Feer for Blockchain {
    fn network_fee(&self, tx: &Transaction) -> Fixed8 {
        let dao = self.dao();
        let mut gas_in = Fixed8::ZERO;
        for input in &tx.inputs {
            if let Ok(Some(unspent)) = dao.get_unspent(&input.prev_hash) {
                if let Some(state) = unspent.states.get(input.prev_index as usize) {
                    if state.output.asset_id == self.utility_asset {
                        gas_in += state.output.amount;
                    }
                }
            }
        }
        let gas_out = tx
            .outputs
            .iter()
            .filter(|o| o.asset_id == self.utility_asset)
            .map(|o| o.amount)
            .sum();
        (gas_in.checked_sub(gas_out).unwrap_or_default()).max(Fixed8::ZERO)
    }

    fn is_low_priority(&self, fee: Fixed8) -> bool {
        fee < Fixed8(100_000)
    }
}

/// A node source reading persisted MPT nodes through the DAO.
struct DaoNodeSource<'a> {
    dao: &'a CachedDao,
}

impl NodeSource for DaoNodeSource<'_> {
    fn node_bytes(&self, hash: &UInt256) -> Option<Vec<u8>> {
        self.dao.get_mpt_node(hash).ok().flatten()
    }
}

/// Encodes the state-root record: version, height, root, empty witness.
fn state_root_record(height: u32, root: &UInt256) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.write_u8(0);
    writer.write_u32(height);
    writer.write_serializable(root);
    writer.write_serializable(&Witness::default());
    writer.into_bytes()
}

/// Extracts the root hash from a state-root record.
fn parse_state_root(bytes: &[u8]) -> LedgerResult<UInt256> {
    let mut reader = neo2_io::MemoryReader::new(bytes);
    let _version = reader.read_u8()?;
    let _height = reader.read_u32()?;
    let root: UInt256 = reader.read_serializable()?;
    Ok(root)
}
