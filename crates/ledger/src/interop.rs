//! The interop layer: named syscalls exposed to contract code.
//!
//! An [`InteropContext`] binds one VM invocation to the current DAO
//! snapshot. Host objects (blocks, transactions, storage contexts,
//! iterators) live in a handle table scoped to the invocation; nothing
//! escapes the context after the VM stops.

use crate::results::{NotificationEvent, TriggerType};
use neo2_core::state::{AssetState, ContractProperties, ContractState, StorageItem};
use neo2_core::transaction::{Attribute, Input, Output, TransactionData};
use neo2_core::{Block, Header, HeaderHashList, Transaction, UInt160, UInt256};
use neo2_storage::{CachedDao, DaoRead, DaoWrite};
use neo2_vm::stack_item::int_to_bytes;
use neo2_vm::{
    serialization, ExecutionEngine, InteropHandle, StackItem, SyscallHandler, VmError, VmResult,
};
use num_traits::ToPrimitive;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Gas units (0.001 GAS each) charged for deploying a new contract.
const CONTRACT_CREATE_COST: i64 = 500_000;
/// Storage rent per started kilobyte written.
const STORAGE_PUT_COST_PER_KB: i64 = 1_000;

/// One entry of the invocation-scoped host table.
#[derive(Debug, Clone)]
enum HostValue {
    Block(Block),
    Header(Header),
    Tx(Transaction),
    Account(neo2_core::state::AccountState),
    Asset(AssetState),
    Contract(ContractState),
    StorageContext { script_hash: UInt160, read_only: bool },
    Iterator(InteropIterator),
    Attribute(Attribute),
    Input(Input),
    Output(Output),
    Witness(neo2_core::Witness),
}

/// A forward iterator over key/value pairs, snapshotted at creation.
#[derive(Debug, Clone)]
pub struct InteropIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: Option<usize>,
}

impl InteropIterator {
    fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        InteropIterator {
            entries,
            position: None,
        }
    }

    fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.entries.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.entries.len());
            false
        }
    }

    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.position.and_then(|p| self.entries.get(p))
    }
}

/// Host environment for one VM invocation.
pub struct InteropContext<'a> {
    pub trigger: TriggerType,
    pub tx: Option<&'a Transaction>,
    pub dao: &'a mut CachedDao,
    /// Chain height before the persisting block.
    pub chain_height: u32,
    pub header_hashes: &'a HeaderHashList,
    /// Timestamp of the block being persisted; what `GetTime` returns.
    pub persisting_time: u32,
    /// Script hashes whose witnesses verified for the current transaction.
    pub witnesses: BTreeSet<UInt160>,
    pub notifications: Vec<NotificationEvent>,
    values: Vec<HostValue>,
    /// DAO layer bookkeeping for nested contract calls.
    snapshot_depths: Vec<usize>,
}

impl<'a> InteropContext<'a> {
    /// Binds a context to the DAO and chain view.
    pub fn new(
        trigger: TriggerType,
        tx: Option<&'a Transaction>,
        dao: &'a mut CachedDao,
        chain_height: u32,
        header_hashes: &'a HeaderHashList,
        persisting_time: u32,
        witnesses: BTreeSet<UInt160>,
    ) -> Self {
        InteropContext {
            trigger,
            tx,
            dao,
            chain_height,
            header_hashes,
            persisting_time,
            witnesses,
            notifications: Vec::new(),
            values: Vec::new(),
            snapshot_depths: Vec::new(),
        }
    }

    fn add_value(&mut self, value: HostValue) -> InteropHandle {
        self.values.push(value);
        InteropHandle(self.values.len() as u32 - 1)
    }

    fn value(&self, handle: InteropHandle) -> VmResult<&HostValue> {
        self.values
            .get(handle.0 as usize)
            .ok_or_else(|| VmError::syscall("dangling interop handle"))
    }

    fn pop_handle(&self, engine: &mut ExecutionEngine) -> VmResult<InteropHandle> {
        match engine.pop()? {
            StackItem::Interop(handle) => Ok(handle),
            _ => Err(VmError::TypeMismatch { expected: "interop handle" }),
        }
    }

    fn push_handle(&mut self, engine: &mut ExecutionEngine, value: HostValue) -> VmResult<()> {
        let handle = self.add_value(value);
        engine.push(StackItem::Interop(handle))
    }

    fn pop_storage_context(
        &self,
        engine: &mut ExecutionEngine,
    ) -> VmResult<(UInt160, bool)> {
        let handle = self.pop_handle(engine)?;
        match self.value(handle)? {
            HostValue::StorageContext {
                script_hash,
                read_only,
            } => Ok((*script_hash, *read_only)),
            _ => Err(VmError::TypeMismatch { expected: "storage context" }),
        }
    }

    /// Put/Delete preconditions: a writable context owned by a deployed
    /// contract with the storage capability.
    fn check_storage_context(&self, script_hash: &UInt160, read_only: bool) -> VmResult<()> {
        if read_only {
            return Err(VmError::syscall("storage context is read-only"));
        }
        let contract = self
            .dao
            .get_contract_state(script_hash)
            .map_err(VmError::syscall)?
            .ok_or_else(|| VmError::syscall("no contract at storage context"))?;
        if !contract.has_storage() {
            return Err(VmError::syscall("contract has no storage capability"));
        }
        Ok(())
    }

    fn current_hash(&self, engine: &ExecutionEngine) -> VmResult<UInt160> {
        engine
            .current_script_hash()
            .ok_or_else(|| VmError::syscall("no executing context"))
    }

    fn trimmed_block(&self, engine: &mut ExecutionEngine) -> VmResult<neo2_core::TrimmedBlock> {
        // Accepts a 32-byte hash or a height index.
        let top = engine.pop()?;
        let bytes = engine.arena().to_bytes(&top)?;
        let hash = if bytes.len() == 32 {
            UInt256::from_bytes(&bytes).map_err(VmError::syscall)?
        } else {
            let index = neo2_vm::stack_item::bytes_to_int(&bytes)
                .to_u32()
                .ok_or_else(|| VmError::syscall("invalid block index"))?;
            self.header_hashes
                .get(index as usize)
                .ok_or_else(|| VmError::syscall("unknown block index"))?
        };
        self.dao
            .get_block(&hash)
            .map_err(VmError::syscall)?
            .ok_or_else(|| VmError::syscall("unknown block"))
    }

    fn full_block(&self, trimmed: neo2_core::TrimmedBlock) -> VmResult<Block> {
        let dao = &self.dao;
        trimmed
            .into_block(|hash| {
                dao.get_transaction(hash)
                    .ok()
                    .flatten()
                    .map(|(_, tx)| tx)
            })
            .map_err(VmError::syscall)
    }

    fn push_pubkey_array(
        &mut self,
        engine: &mut ExecutionEngine,
        keys: Vec<Vec<u8>>,
    ) -> VmResult<()> {
        let items: Vec<StackItem> = keys.into_iter().map(StackItem::ByteArray).collect();
        let handle = engine.arena_mut().alloc_list(items);
        engine.push(StackItem::Array(handle))
    }
}

impl SyscallHandler for InteropContext<'_> {
    fn price(&self, name: &str) -> i64 {
        match name {
            "Neo.Storage.Get" | "Neo.Storage.Delete" => 100,
            "Neo.Storage.Put" => STORAGE_PUT_COST_PER_KB,
            "Neo.Storage.Find" => 1_000,
            "Neo.Blockchain.GetHeader"
            | "Neo.Blockchain.GetBlock"
            | "Neo.Blockchain.GetTransaction"
            | "Neo.Blockchain.GetTransactionHeight"
            | "Neo.Blockchain.GetAccount"
            | "Neo.Blockchain.GetValidators"
            | "Neo.Blockchain.GetAsset"
            | "Neo.Blockchain.GetContract" => 100,
            "Neo.Runtime.CheckWitness" => 200,
            "Neo.Crypto.Secp256r1Recover" | "Neo.Crypto.Secp256k1Recover" => 100,
            "Neo.Crypto.Hash160" | "Neo.Crypto.Hash256" => 20,
            // Deployment cost is charged inside the handler, only when a
            // contract is actually created.
            "Neo.Contract.Create" | "Neo.Contract.Destroy" => 100,
            _ => 1,
        }
    }

    fn invoke(&mut self, name: &str, engine: &mut ExecutionEngine) -> VmResult<()> {
        match name {
            // ---- blockchain ------------------------------------------------
            "Neo.Blockchain.GetHeight" => engine.push(StackItem::int(i64::from(self.chain_height))),
            "Neo.Blockchain.GetHeader" => {
                let trimmed = self.trimmed_block(engine)?;
                let header = Header { base: trimmed.base };
                self.push_handle(engine, HostValue::Header(header))
            }
            "Neo.Blockchain.GetBlock" => {
                let trimmed = self.trimmed_block(engine)?;
                let block = self.full_block(trimmed)?;
                self.push_handle(engine, HostValue::Block(block))
            }
            "Neo.Blockchain.GetTransaction" => {
                let bytes = engine.pop_bytes()?;
                let hash = UInt256::from_bytes(&bytes).map_err(VmError::syscall)?;
                let (_, tx) = self
                    .dao
                    .get_transaction(&hash)
                    .map_err(VmError::syscall)?
                    .ok_or_else(|| VmError::syscall("unknown transaction"))?;
                self.push_handle(engine, HostValue::Tx(tx))
            }
            "Neo.Blockchain.GetTransactionHeight" => {
                let bytes = engine.pop_bytes()?;
                let hash = UInt256::from_bytes(&bytes).map_err(VmError::syscall)?;
                let (height, _) = self
                    .dao
                    .get_transaction(&hash)
                    .map_err(VmError::syscall)?
                    .ok_or_else(|| VmError::syscall("unknown transaction"))?;
                engine.push(StackItem::int(i64::from(height)))
            }
            "Neo.Blockchain.GetContract" => {
                let bytes = engine.pop_bytes()?;
                let hash = UInt160::from_bytes(&bytes).map_err(VmError::syscall)?;
                let contract = self
                    .dao
                    .get_contract_state(&hash)
                    .map_err(VmError::syscall)?
                    .ok_or_else(|| VmError::syscall("unknown contract"))?;
                self.push_handle(engine, HostValue::Contract(contract))
            }
            "Neo.Blockchain.GetAccount" => {
                let bytes = engine.pop_bytes()?;
                let hash = UInt160::from_bytes(&bytes).map_err(VmError::syscall)?;
                let account = self.dao.get_account_or_new(&hash).map_err(VmError::syscall)?;
                self.push_handle(engine, HostValue::Account(account))
            }
            "Neo.Blockchain.GetAsset" => {
                let bytes = engine.pop_bytes()?;
                let id = UInt256::from_bytes(&bytes).map_err(VmError::syscall)?;
                let asset = self
                    .dao
                    .get_asset(&id)
                    .map_err(VmError::syscall)?
                    .ok_or_else(|| VmError::syscall("unknown asset"))?;
                self.push_handle(engine, HostValue::Asset(asset))
            }
            "Neo.Blockchain.GetValidators" => {
                let validators = self.dao.get_validators().map_err(VmError::syscall)?;
                let keys = validators
                    .iter()
                    .map(|v| v.public_key.to_bytes().to_vec())
                    .collect();
                self.push_pubkey_array(engine, keys)
            }

            // ---- header getters --------------------------------------------
            "Neo.Header.GetHash" | "Neo.Header.GetVersion" | "Neo.Header.GetPrevHash"
            | "Neo.Header.GetMerkleRoot" | "Neo.Header.GetTimestamp" | "Neo.Header.GetIndex"
            | "Neo.Header.GetConsensusData" | "Neo.Header.GetNextConsensus" => {
                let handle = self.pop_handle(engine)?;
                let base = match self.value(handle)? {
                    HostValue::Header(h) => h.base.clone(),
                    HostValue::Block(b) => b.base.clone(),
                    _ => return Err(VmError::TypeMismatch { expected: "header" }),
                };
                let item = match name {
                    "Neo.Header.GetHash" => StackItem::ByteArray(base.hash().as_bytes().to_vec()),
                    "Neo.Header.GetVersion" => StackItem::int(i64::from(base.version)),
                    "Neo.Header.GetPrevHash" => {
                        StackItem::ByteArray(base.prev_hash.as_bytes().to_vec())
                    }
                    "Neo.Header.GetMerkleRoot" => {
                        StackItem::ByteArray(base.merkle_root.as_bytes().to_vec())
                    }
                    "Neo.Header.GetTimestamp" => StackItem::int(i64::from(base.timestamp)),
                    "Neo.Header.GetIndex" => StackItem::int(i64::from(base.index)),
                    "Neo.Header.GetConsensusData" => {
                        StackItem::Integer(base.consensus_data.into())
                    }
                    _ => StackItem::ByteArray(base.next_consensus.as_bytes().to_vec()),
                };
                engine.push(item)
            }
            "Neo.Block.GetTransactionCount" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Block(block) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "block" });
                };
                engine.push(StackItem::int(block.transactions.len() as i64))
            }
            "Neo.Block.GetTransaction" => {
                let handle = self.pop_handle(engine)?;
                let index = engine.pop_i64()?;
                let HostValue::Block(block) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "block" });
                };
                let tx = block
                    .transactions
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| VmError::syscall("transaction index out of range"))?;
                self.push_handle(engine, HostValue::Tx(tx))
            }

            // ---- transaction getters ---------------------------------------
            "Neo.Transaction.GetHash" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                let hash = tx.hash();
                engine.push(StackItem::ByteArray(hash.as_bytes().to_vec()))
            }
            "Neo.Transaction.GetType" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                engine.push(StackItem::int(i64::from(tx.tx_type() as u8)))
            }
            "Neo.Transaction.GetAttributes" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                let attrs = tx.attributes.clone();
                let handles: Vec<StackItem> = attrs
                    .into_iter()
                    .map(|a| StackItem::Interop(self.add_value(HostValue::Attribute(a))))
                    .collect();
                let list = engine.arena_mut().alloc_list(handles);
                engine.push(StackItem::Array(list))
            }
            "Neo.Transaction.GetInputs" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                let inputs = tx.inputs.clone();
                let handles: Vec<StackItem> = inputs
                    .into_iter()
                    .map(|i| StackItem::Interop(self.add_value(HostValue::Input(i))))
                    .collect();
                let list = engine.arena_mut().alloc_list(handles);
                engine.push(StackItem::Array(list))
            }
            "Neo.Transaction.GetOutputs" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                let outputs = tx.outputs.clone();
                let handles: Vec<StackItem> = outputs
                    .into_iter()
                    .map(|o| StackItem::Interop(self.add_value(HostValue::Output(o))))
                    .collect();
                let list = engine.arena_mut().alloc_list(handles);
                engine.push(StackItem::Array(list))
            }
            "Neo.Transaction.GetWitnesses" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                let witnesses = tx.scripts.clone();
                let handles: Vec<StackItem> = witnesses
                    .into_iter()
                    .map(|w| StackItem::Interop(self.add_value(HostValue::Witness(w))))
                    .collect();
                let list = engine.arena_mut().alloc_list(handles);
                engine.push(StackItem::Array(list))
            }
            "Neo.Witness.GetVerificationScript" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Witness(witness) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "witness" });
                };
                let script = witness.verification_script.clone();
                engine.push(StackItem::ByteArray(script))
            }
            "Neo.Transaction.GetScript" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Tx(tx) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "transaction" });
                };
                match &tx.data {
                    TransactionData::Invocation { script, .. } => {
                        engine.push(StackItem::ByteArray(script.clone()))
                    }
                    _ => engine.push(StackItem::ByteArray(Vec::new())),
                }
            }

            // ---- attribute / input / output getters ------------------------
            "Neo.Attribute.GetUsage" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Attribute(attr) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "attribute" });
                };
                engine.push(StackItem::int(i64::from(attr.usage as u8)))
            }
            "Neo.Attribute.GetData" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Attribute(attr) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "attribute" });
                };
                let data = attr.data.clone();
                engine.push(StackItem::ByteArray(data))
            }
            "Neo.Input.GetHash" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Input(input) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "input" });
                };
                engine.push(StackItem::ByteArray(input.prev_hash.as_bytes().to_vec()))
            }
            "Neo.Input.GetIndex" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Input(input) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "input" });
                };
                engine.push(StackItem::int(i64::from(input.prev_index)))
            }
            "Neo.Output.GetAssetId" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Output(output) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "output" });
                };
                engine.push(StackItem::ByteArray(output.asset_id.as_bytes().to_vec()))
            }
            "Neo.Output.GetValue" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Output(output) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "output" });
                };
                engine.push(StackItem::int(output.amount.raw()))
            }
            "Neo.Output.GetScriptHash" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Output(output) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "output" });
                };
                engine.push(StackItem::ByteArray(output.script_hash.as_bytes().to_vec()))
            }

            // ---- account / asset getters -----------------------------------
            "Neo.Account.GetScriptHash" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Account(account) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "account" });
                };
                engine.push(StackItem::ByteArray(account.script_hash.as_bytes().to_vec()))
            }
            "Neo.Account.GetBalance" => {
                let handle = self.pop_handle(engine)?;
                let asset_bytes = engine.pop_bytes()?;
                let asset = UInt256::from_bytes(&asset_bytes).map_err(VmError::syscall)?;
                let HostValue::Account(account) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "account" });
                };
                engine.push(StackItem::int(account.balance(&asset).raw()))
            }
            "Neo.Account.GetVotes" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Account(account) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "account" });
                };
                let votes = account
                    .votes
                    .iter()
                    .map(|k| k.to_bytes().to_vec())
                    .collect();
                self.push_pubkey_array(engine, votes)
            }
            "Neo.Asset.GetAssetId" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::ByteArray(asset.id.as_bytes().to_vec()))
            }
            "Neo.Asset.GetAssetType" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::int(i64::from(asset.asset_type as u8)))
            }
            "Neo.Asset.GetAmount" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::int(asset.amount.raw()))
            }
            "Neo.Asset.GetAvailable" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::int(asset.available.raw()))
            }
            "Neo.Asset.GetPrecision" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::int(i64::from(asset.precision)))
            }
            "Neo.Asset.GetOwner" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                let owner = asset.owner.to_bytes().to_vec();
                engine.push(StackItem::ByteArray(owner))
            }
            "Neo.Asset.GetAdmin" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::ByteArray(asset.admin.as_bytes().to_vec()))
            }
            "Neo.Asset.GetIssuer" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Asset(asset) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "asset" });
                };
                engine.push(StackItem::ByteArray(asset.issuer.as_bytes().to_vec()))
            }

            // ---- storage ---------------------------------------------------
            "Neo.Storage.GetContext" => {
                let script_hash = self.current_hash(engine)?;
                self.push_handle(
                    engine,
                    HostValue::StorageContext {
                        script_hash,
                        read_only: false,
                    },
                )
            }
            "Neo.Storage.GetReadOnlyContext" => {
                let script_hash = self.current_hash(engine)?;
                self.push_handle(
                    engine,
                    HostValue::StorageContext {
                        script_hash,
                        read_only: true,
                    },
                )
            }
            "Neo.Storage.Get" => {
                let (script_hash, _) = self.pop_storage_context(engine)?;
                let key = engine.pop_bytes()?;
                let value = self
                    .dao
                    .get_storage_item(&script_hash, &key)
                    .map_err(VmError::syscall)?
                    .map(|item| item.value)
                    .unwrap_or_default();
                engine.push(StackItem::ByteArray(value))
            }
            "Neo.Storage.Put" => {
                let (script_hash, read_only) = self.pop_storage_context(engine)?;
                let key = engine.pop_bytes()?;
                let value = engine.pop_bytes()?;
                self.check_storage_context(&script_hash, read_only)?;
                if let Some(existing) = self
                    .dao
                    .get_storage_item(&script_hash, &key)
                    .map_err(VmError::syscall)?
                {
                    if existing.is_const {
                        return Err(VmError::syscall("storage item is constant"));
                    }
                }
                // Rent for every started KB beyond the first (the base price
                // covered it).
                let extra_kb = (key.len() + value.len()) / 1024;
                engine.charge(extra_kb as i64 * STORAGE_PUT_COST_PER_KB)?;
                self.dao
                    .put_storage_item(&script_hash, &key, &StorageItem::new(value))
                    .map_err(VmError::syscall)?;
                Ok(())
            }
            "Neo.Storage.Delete" => {
                let (script_hash, read_only) = self.pop_storage_context(engine)?;
                let key = engine.pop_bytes()?;
                self.check_storage_context(&script_hash, read_only)?;
                if let Some(existing) = self
                    .dao
                    .get_storage_item(&script_hash, &key)
                    .map_err(VmError::syscall)?
                {
                    if existing.is_const {
                        return Err(VmError::syscall("storage item is constant"));
                    }
                }
                self.dao
                    .delete_storage_item(&script_hash, &key)
                    .map_err(VmError::syscall)?;
                Ok(())
            }
            "Neo.Storage.Find" => {
                let (script_hash, _) = self.pop_storage_context(engine)?;
                let prefix = engine.pop_bytes()?;
                let mut cursor = self
                    .dao
                    .find_storage_items(&script_hash, &prefix)
                    .map_err(VmError::syscall)?;
                let mut entries = Vec::with_capacity(cursor.remaining());
                while cursor.next() {
                    entries.push((
                        cursor.key().unwrap_or_default().to_vec(),
                        cursor.value().unwrap_or_default().to_vec(),
                    ));
                }
                self.push_handle(engine, HostValue::Iterator(InteropIterator::new(entries)))
            }

            // ---- runtime ---------------------------------------------------
            "Neo.Runtime.GetTrigger" => engine.push(StackItem::int(i64::from(self.trigger as u8))),
            "Neo.Runtime.CheckWitness" => {
                let bytes = engine.pop_bytes()?;
                let hash = match bytes.len() {
                    20 => UInt160::from_bytes(&bytes).map_err(VmError::syscall)?,
                    33 => {
                        let key = neo2_crypto::PublicKey::from_bytes(&bytes)
                            .map_err(VmError::syscall)?;
                        UInt160::from_script(&neo2_vm::contract::create_signature_redeem_script(
                            &key,
                        ))
                    }
                    _ => return Err(VmError::syscall("witness must be a hash or public key")),
                };
                let verified = self.witnesses.contains(&hash)
                    || engine.calling_script_hash() == Some(hash);
                engine.push(StackItem::Boolean(verified))
            }
            "Neo.Runtime.Notify" => {
                let item = engine.pop()?;
                let serialized = serialization::serialize_item(engine.arena(), &item)?;
                let script_hash = self.current_hash(engine)?;
                debug!(contract = %script_hash, "runtime notification");
                self.notifications.push(NotificationEvent {
                    script_hash,
                    item: serialized,
                });
                Ok(())
            }
            "Neo.Runtime.Log" => {
                let message = engine.pop_bytes()?;
                let script_hash = self.current_hash(engine)?;
                info!(contract = %script_hash, message = %String::from_utf8_lossy(&message), "runtime log");
                Ok(())
            }
            "Neo.Runtime.GetTime" => engine.push(StackItem::int(i64::from(self.persisting_time))),
            "Neo.Runtime.Serialize" => {
                let item = engine.pop()?;
                let bytes = serialization::serialize_item(engine.arena(), &item)?;
                engine.push(StackItem::ByteArray(bytes))
            }
            "Neo.Runtime.Deserialize" => {
                let bytes = engine.pop_bytes()?;
                let item = serialization::deserialize_item(engine.arena_mut(), &bytes)?;
                engine.push(item)
            }

            // ---- crypto ----------------------------------------------------
            "Neo.Crypto.Hash160" => {
                let data = engine.pop_bytes()?;
                engine.push(StackItem::ByteArray(neo2_crypto::hash160(&data).to_vec()))
            }
            "Neo.Crypto.Hash256" => {
                let data = engine.pop_bytes()?;
                engine.push(StackItem::ByteArray(neo2_crypto::hash256(&data).to_vec()))
            }
            "Neo.Crypto.Secp256r1Recover" | "Neo.Crypto.Secp256k1Recover" => {
                let recovery_id = engine.pop_i64()?;
                let sig_bytes = engine.pop_bytes()?;
                let digest_bytes = engine.pop_bytes()?;
                let recovered = (|| {
                    let digest: [u8; 32] = digest_bytes.as_slice().try_into().ok()?;
                    let signature = neo2_crypto::Signature::from_slice(&sig_bytes).ok()?;
                    if name == "Neo.Crypto.Secp256r1Recover" {
                        neo2_crypto::keys::secp256r1_recover(&digest, &signature, recovery_id as u8)
                            .ok()
                            .map(|k| k.to_bytes().to_vec())
                    } else {
                        neo2_crypto::keys::secp256k1_recover(&digest, &signature, recovery_id as u8)
                            .ok()
                            .map(|k| k.to_vec())
                    }
                })();
                engine.push(StackItem::ByteArray(recovered.unwrap_or_default()))
            }

            // ---- contract management ---------------------------------------
            "Neo.Contract.Create" => {
                let script = engine.pop_bytes()?;
                let param_list = engine.pop_bytes()?;
                let return_type = engine.pop_i64()? as u8;
                let properties = ContractProperties::from_bits_retain(engine.pop_i64()? as u8);
                let name_field = engine.pop_bytes()?;
                let code_version = engine.pop_bytes()?;
                let author = engine.pop_bytes()?;
                let email = engine.pop_bytes()?;
                let description = engine.pop_bytes()?;

                let hash = UInt160::from_script(&script);
                let contract = match self
                    .dao
                    .get_contract_state(&hash)
                    .map_err(VmError::syscall)?
                {
                    // Re-deployment of identical code returns the existing
                    // record without charging storage again.
                    Some(existing) => existing,
                    None => {
                        engine.charge(CONTRACT_CREATE_COST)?;
                        let contract = ContractState {
                            script,
                            param_list,
                            return_type,
                            properties,
                            name: String::from_utf8_lossy(&name_field).into_owned(),
                            code_version: String::from_utf8_lossy(&code_version).into_owned(),
                            author: String::from_utf8_lossy(&author).into_owned(),
                            email: String::from_utf8_lossy(&email).into_owned(),
                            description: String::from_utf8_lossy(&description).into_owned(),
                        };
                        self.dao
                            .put_contract_state(&contract)
                            .map_err(VmError::syscall)?;
                        info!(contract = %hash, "contract deployed");
                        contract
                    }
                };
                self.push_handle(engine, HostValue::Contract(contract))
            }
            "Neo.Contract.Destroy" => {
                let hash = self.current_hash(engine)?;
                if self
                    .dao
                    .get_contract_state(&hash)
                    .map_err(VmError::syscall)?
                    .is_some()
                {
                    self.dao
                        .delete_contract_state(&hash)
                        .map_err(VmError::syscall)?;
                    let mut cursor = self
                        .dao
                        .find_storage_items(&hash, &[])
                        .map_err(VmError::syscall)?;
                    while cursor.next() {
                        let key = cursor.key().unwrap_or_default().to_vec();
                        self.dao
                            .delete_storage_item(&hash, &key)
                            .map_err(VmError::syscall)?;
                    }
                    info!(contract = %hash, "contract destroyed");
                }
                Ok(())
            }
            "Neo.Contract.GetScript" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Contract(contract) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "contract" });
                };
                let script = contract.script.clone();
                engine.push(StackItem::ByteArray(script))
            }
            "Neo.Contract.GetStorageContext" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Contract(contract) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "contract" });
                };
                let hash = contract.script_hash();
                if self.current_hash(engine)? != hash {
                    return Err(VmError::syscall(
                        "storage context belongs to another contract",
                    ));
                }
                self.push_handle(
                    engine,
                    HostValue::StorageContext {
                        script_hash: hash,
                        read_only: false,
                    },
                )
            }

            // ---- iterators -------------------------------------------------
            "Neo.Iterator.Create" => {
                let item = engine.pop()?;
                let entries = match item {
                    StackItem::Array(h) | StackItem::Struct(h) => {
                        let items = engine.arena().list(h)?.clone();
                        items
                            .iter()
                            .enumerate()
                            .map(|(i, element)| {
                                Ok((
                                    int_to_bytes(&(i as i64).into()),
                                    engine.arena().to_bytes(element)?,
                                ))
                            })
                            .collect::<VmResult<Vec<_>>>()?
                    }
                    StackItem::Map(h) => {
                        let pairs = engine.arena().map(h)?.clone();
                        pairs
                            .iter()
                            .map(|(k, v)| {
                                Ok((engine.arena().to_bytes(k)?, engine.arena().to_bytes(v)?))
                            })
                            .collect::<VmResult<Vec<_>>>()?
                    }
                    _ => return Err(VmError::TypeMismatch { expected: "collection" }),
                };
                self.push_handle(engine, HostValue::Iterator(InteropIterator::new(entries)))
            }
            "Neo.Iterator.Concat" => {
                let second = self.pop_handle(engine)?;
                let first = self.pop_handle(engine)?;
                let HostValue::Iterator(a) = self.value(first)? else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let HostValue::Iterator(b) = self.value(second)? else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let mut entries = a.entries.clone();
                entries.extend(b.entries.iter().cloned());
                self.push_handle(engine, HostValue::Iterator(InteropIterator::new(entries)))
            }
            "Neo.Iterator.Next" => {
                let handle = self.pop_handle(engine)?;
                let value = self
                    .values
                    .get_mut(handle.0 as usize)
                    .ok_or_else(|| VmError::syscall("dangling interop handle"))?;
                let HostValue::Iterator(iterator) = value else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let advanced = iterator.next();
                engine.push(StackItem::Boolean(advanced))
            }
            "Neo.Iterator.Key" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Iterator(iterator) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let (key, _) = iterator
                    .current()
                    .ok_or_else(|| VmError::syscall("iterator not positioned"))?;
                let key = key.clone();
                engine.push(StackItem::ByteArray(key))
            }
            "Neo.Iterator.Value" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Iterator(iterator) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let (_, value) = iterator
                    .current()
                    .ok_or_else(|| VmError::syscall("iterator not positioned"))?;
                let value = value.clone();
                engine.push(StackItem::ByteArray(value))
            }
            "Neo.Iterator.Keys" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Iterator(iterator) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let entries = iterator
                    .entries
                    .iter()
                    .map(|(k, _)| (k.clone(), k.clone()))
                    .collect();
                self.push_handle(engine, HostValue::Iterator(InteropIterator::new(entries)))
            }
            "Neo.Iterator.Values" => {
                let handle = self.pop_handle(engine)?;
                let HostValue::Iterator(iterator) = self.value(handle)? else {
                    return Err(VmError::TypeMismatch { expected: "iterator" });
                };
                let entries = iterator
                    .entries
                    .iter()
                    .map(|(_, v)| (v.clone(), v.clone()))
                    .collect();
                self.push_handle(engine, HostValue::Iterator(InteropIterator::new(entries)))
            }

            other => Err(VmError::UnknownSyscall(other.to_string())),
        }
    }

    fn contract_script(&mut self, hash: &UInt160, call_depth: usize) -> VmResult<Vec<u8>> {
        let contract = self
            .dao
            .get_contract_state(hash)
            .map_err(VmError::syscall)?
            .ok_or_else(|| VmError::syscall(format!("unknown contract {hash}")))?;
        // Snapshot the state for the nested call; committed when the callee
        // context unloads.
        self.dao.push_layer();
        self.snapshot_depths.push(call_depth);
        Ok(contract.script)
    }

    fn on_context_unloaded(&mut self, remaining_depth: usize) {
        while matches!(self.snapshot_depths.last(), Some(depth) if *depth > remaining_depth) {
            self.snapshot_depths.pop();
            self.dao.commit_layer();
        }
    }
}
