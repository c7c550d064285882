//! End-to-end engine tests over an in-memory store.

use neo2_core::state::CoinState;
use neo2_core::transaction::{Input, Output, Transaction, TransactionData};
use neo2_core::{Block, BlockBase, Fixed8, NetworkParams, UInt160, UInt256, Witness};
use neo2_ledger::blockchain::Blockchainer;
use neo2_ledger::genesis;
use neo2_ledger::{Blockchain, TriggerType};
use neo2_storage::{DaoRead, MemoryStore};
use neo2_vm::{emit, OpCode, VMState};
use std::sync::Arc;

fn new_chain() -> (Blockchain, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let chain = Blockchain::new(
        Arc::clone(&store) as Arc<dyn neo2_storage::Store>,
        NetworkParams::privnet(vec![]),
    )
    .unwrap();
    (chain, store)
}

/// The `PUSH1` anyone-can-spend witness used by the private test net.
fn open_witness() -> Witness {
    Witness::new(Vec::new(), vec![0x51])
}

fn next_block(chain: &Blockchain, mut txs: Vec<Transaction>) -> Block {
    let height = chain.block_height();
    let mut transactions = vec![Transaction::new(
        0,
        TransactionData::Miner {
            nonce: height + 7000,
        },
    )];
    transactions.append(&mut txs);

    let prev_hash = chain.current_hash();
    let prev = chain.get_block(&prev_hash).unwrap().unwrap();
    let mut block = Block {
        base: BlockBase {
            version: 0,
            prev_hash,
            merkle_root: UInt256::zero(),
            timestamp: prev.base.timestamp + 15,
            index: height + 1,
            consensus_data: u64::from(height) + 1,
            next_consensus: genesis::anyone_can_spend_hash(),
            script: open_witness(),
        },
        transactions,
    };
    block.rebuild_merkle_root().unwrap();
    block
}

#[test]
fn genesis_only_chain_reads_height_zero() {
    let (chain, _) = new_chain();
    assert_eq!(chain.block_height(), 0);

    let genesis_hash = genesis::genesis_block(&NetworkParams::privnet(vec![])).hash();
    assert_eq!(chain.header_hash(0), Some(genesis_hash));
    assert_eq!(chain.current_hash(), genesis_hash);
    assert!(chain.header_hash(1).is_none());
}

#[test]
fn chain_reopens_from_store() {
    let (chain, store) = new_chain();
    chain.add_block(next_block(&chain, vec![])).unwrap();
    let tip = chain.current_hash();
    let root = chain.current_state_root();
    drop(chain);

    let reopened = Blockchain::new(store, NetworkParams::privnet(vec![])).unwrap();
    assert_eq!(reopened.block_height(), 1);
    assert_eq!(reopened.current_hash(), tip);
    assert_eq!(reopened.current_state_root(), root);
}

#[test]
fn rejects_wrong_index_and_prev_hash() {
    let (chain, _) = new_chain();
    let mut block = next_block(&chain, vec![]);
    block.base.index = 5;
    block.rebuild_merkle_root().unwrap();
    assert!(chain.add_block(block).is_err());

    let mut block = next_block(&chain, vec![]);
    block.base.prev_hash = UInt256::hash(b"wrong");
    assert!(chain.add_block(block).is_err());

    assert_eq!(chain.block_height(), 0);
}

#[test]
fn rejects_bad_block_witness() {
    let (chain, _) = new_chain();
    let mut block = next_block(&chain, vec![]);
    // PUSH0 leaves a falsy top; the witness must fail.
    block.base.script = Witness::new(Vec::new(), vec![0x00]);
    assert!(chain.add_block(block).is_err());
}

fn genesis_issue_tx(chain: &Blockchain) -> Transaction {
    let genesis_hash = chain.header_hash(0).unwrap();
    let block = chain.get_block(&genesis_hash).unwrap().unwrap();
    block
        .transactions
        .iter()
        .find(|tx| tx.tx_type() == neo2_core::transaction::TransactionType::Issue)
        .cloned()
        .unwrap()
}

#[test]
fn two_block_utxo_transfer() {
    let (chain, _) = new_chain();
    let issue = genesis_issue_tx(&chain);
    let holder = genesis::anyone_can_spend_hash();
    let neo = chain.governing_asset_id();
    let receiver = UInt160([0xbb; 20]);

    // Spend the genesis issue output: 40 to the receiver, 60 back.
    let mut transfer = Transaction::new(0, TransactionData::Contract);
    transfer.inputs.push(Input::new(issue.hash(), 0));
    transfer.outputs.push(Output::new(
        neo,
        Fixed8::from_int(40_000_000),
        receiver,
    ));
    transfer.outputs.push(Output::new(
        neo,
        Fixed8::from_int(60_000_000),
        holder,
    ));
    transfer.scripts.push(open_witness());

    chain.add_block(next_block(&chain, vec![transfer.clone()])).unwrap();
    assert_eq!(chain.block_height(), 1);

    let dao = chain.dao();
    // The spent output carries the spent flag and spend height.
    let unspent = dao.get_unspent(&issue.hash()).unwrap().unwrap();
    assert!(unspent.states[0].state.contains(CoinState::SPENT));
    assert_eq!(unspent.states[0].spend_height, 1);

    // The new outputs are unspent.
    let new_unspent = dao.get_unspent(&transfer.hash()).unwrap().unwrap();
    assert!(new_unspent.states.iter().all(|s| !s.is_spent()));

    // Balances reflect the transfer.
    let receiver_account = dao.get_account(&receiver).unwrap().unwrap();
    assert_eq!(receiver_account.balance(&neo), Fixed8::from_int(40_000_000));
    let holder_account = dao.get_account(&holder).unwrap().unwrap();
    assert_eq!(holder_account.balance(&neo), Fixed8::from_int(60_000_000));
}

#[test]
fn double_spend_rejected_across_blocks() {
    let (chain, _) = new_chain();
    let issue = genesis_issue_tx(&chain);
    let neo = chain.governing_asset_id();

    let spend = |nonce: u8| {
        let mut tx = Transaction::new(0, TransactionData::Contract);
        tx.inputs.push(Input::new(issue.hash(), 0));
        tx.outputs.push(Output::new(
            neo,
            Fixed8::from_int(100_000_000),
            UInt160([nonce; 20]),
        ));
        tx.scripts.push(open_witness());
        tx
    };

    chain.add_block(next_block(&chain, vec![spend(1)])).unwrap();
    // A second spend of the same output must be rejected.
    let result = chain.add_block(next_block(&chain, vec![spend(2)]));
    assert!(result.is_err());
    assert_eq!(chain.block_height(), 1);
}

#[test]
fn double_spend_rejected_within_block() {
    let (chain, _) = new_chain();
    let issue = genesis_issue_tx(&chain);
    let neo = chain.governing_asset_id();

    let spend = |nonce: u8| {
        let mut tx = Transaction::new(0, TransactionData::Contract);
        tx.inputs.push(Input::new(issue.hash(), 0));
        tx.outputs.push(Output::new(
            neo,
            Fixed8::from_int(100_000_000),
            UInt160([nonce; 20]),
        ));
        tx.scripts.push(open_witness());
        tx
    };

    let result = chain.add_block(next_block(&chain, vec![spend(1), spend(2)]));
    assert!(result.is_err());
}

#[test]
fn value_creation_rejected() {
    let (chain, _) = new_chain();
    let issue = genesis_issue_tx(&chain);
    let neo = chain.governing_asset_id();

    let mut tx = Transaction::new(0, TransactionData::Contract);
    tx.inputs.push(Input::new(issue.hash(), 0));
    tx.outputs.push(Output::new(
        neo,
        Fixed8::from_int(100_000_001),
        UInt160([1; 20]),
    ));
    tx.scripts.push(open_witness());
    assert!(chain.add_block(next_block(&chain, vec![tx])).is_err());
}

/// Script of the storage test contract: writes `k = v`, reads it back and
/// leaves `read == "v"` on the stack.
fn storage_contract_script() -> Vec<u8> {
    let mut script = Vec::new();
    // Put(ctx, "k", "v")
    emit::bytes(&mut script, b"v");
    emit::bytes(&mut script, b"k");
    emit::syscall(&mut script, "Neo.Storage.GetContext");
    emit::syscall(&mut script, "Neo.Storage.Put");
    // Get(ctx, "k")
    emit::bytes(&mut script, b"k");
    emit::syscall(&mut script, "Neo.Storage.GetContext");
    emit::syscall(&mut script, "Neo.Storage.Get");
    emit::bytes(&mut script, b"v");
    emit::opcode(&mut script, OpCode::Equal);
    script
}

fn deploy_script(contract: &[u8]) -> Vec<u8> {
    let mut script = Vec::new();
    // Arguments in reverse: description, email, author, version, name,
    // properties, return type, parameter list, script.
    emit::bytes(&mut script, b"");
    emit::bytes(&mut script, b"dev@example.com");
    emit::bytes(&mut script, b"dev");
    emit::bytes(&mut script, b"1.0");
    emit::bytes(&mut script, b"storage-test");
    emit::int(&mut script, 0x01); // HAS_STORAGE
    emit::int(&mut script, 0x01); // Boolean return
    emit::bytes(&mut script, b"");
    emit::bytes(&mut script, contract);
    emit::syscall(&mut script, "Neo.Contract.Create");
    script
}

#[test]
fn contract_deployment_and_read() {
    let (chain, _) = new_chain();
    let contract_script = vec![0x51, 0x66]; // PUSH1 RET
    let contract_hash = UInt160::from_script(&contract_script);

    let deploy = Transaction::new(
        1,
        TransactionData::Invocation {
            script: deploy_script(&contract_script),
            gas: Fixed8::from_int(500),
        },
    );
    chain.add_block(next_block(&chain, vec![deploy.clone()])).unwrap();

    let stored = chain.dao().get_contract_state(&contract_hash).unwrap().unwrap();
    assert_eq!(stored.script, contract_script);
    assert!(stored.has_storage());

    let first_result = chain.get_app_exec_result(&deploy.hash()).unwrap().unwrap();
    assert_eq!(first_result.vm_state, VMState::Halt);
    let first_gas = first_result.gas_consumed;

    // Re-deploying identical code succeeds, yields the same hash and does
    // not charge the creation fee again.
    let redeploy = Transaction::new(
        1,
        TransactionData::Invocation {
            script: deploy_script(&contract_script),
            gas: Fixed8::from_int(1),
        },
    );
    chain.add_block(next_block(&chain, vec![redeploy.clone()])).unwrap();
    let second_result = chain.get_app_exec_result(&redeploy.hash()).unwrap().unwrap();
    assert_eq!(second_result.vm_state, VMState::Halt);
    assert!(second_result.gas_consumed < first_gas);
    assert_eq!(
        chain.dao().get_contract_state(&contract_hash).unwrap().unwrap().script,
        contract_script
    );
}

#[test]
fn storage_put_get_round_trip() {
    let (chain, _) = new_chain();
    let contract = storage_contract_script();
    let contract_hash = UInt160::from_script(&contract);

    // Deploy the contract, then invoke it through APPCALL.
    let deploy = Transaction::new(
        1,
        TransactionData::Invocation {
            script: deploy_script(&contract),
            gas: Fixed8::from_int(500),
        },
    );
    chain.add_block(next_block(&chain, vec![deploy])).unwrap();

    let mut invoke_script = Vec::new();
    emit::appcall(&mut invoke_script, &contract_hash);
    let invoke = Transaction::new(
        1,
        TransactionData::Invocation {
            script: invoke_script,
            gas: Fixed8::ZERO,
        },
    );
    chain.add_block(next_block(&chain, vec![invoke.clone()])).unwrap();

    let result = chain.get_app_exec_result(&invoke.hash()).unwrap().unwrap();
    assert_eq!(result.vm_state, VMState::Halt);
    assert_eq!(result.trigger, TriggerType::Application);
    // The script left `true` on the stack: serialized Boolean(true).
    assert_eq!(result.stack.last().unwrap(), &vec![0x01, 0x01]);

    assert_eq!(
        chain.get_storage_value(&contract_hash, b"k").unwrap(),
        Some(b"v".to_vec())
    );
}

#[test]
fn faulted_invocation_discards_storage_but_persists_result() {
    let (chain, _) = new_chain();
    let contract = {
        // Put then THROW: the write must not survive.
        let mut script = Vec::new();
        emit::bytes(&mut script, b"v");
        emit::bytes(&mut script, b"k");
        emit::syscall(&mut script, "Neo.Storage.GetContext");
        emit::syscall(&mut script, "Neo.Storage.Put");
        emit::opcode(&mut script, OpCode::Throw);
        script
    };
    let contract_hash = UInt160::from_script(&contract);

    let deploy = Transaction::new(
        1,
        TransactionData::Invocation {
            script: deploy_script(&contract),
            gas: Fixed8::from_int(500),
        },
    );
    chain.add_block(next_block(&chain, vec![deploy])).unwrap();

    let mut invoke_script = Vec::new();
    emit::appcall(&mut invoke_script, &contract_hash);
    let invoke = Transaction::new(
        1,
        TransactionData::Invocation {
            script: invoke_script,
            gas: Fixed8::ZERO,
        },
    );
    chain.add_block(next_block(&chain, vec![invoke.clone()])).unwrap();

    let result = chain.get_app_exec_result(&invoke.hash()).unwrap().unwrap();
    assert_eq!(result.vm_state, VMState::Fault);
    assert_eq!(chain.get_storage_value(&contract_hash, b"k").unwrap(), None);
    // The transaction itself still applied.
    assert!(chain.get_transaction(&invoke.hash()).unwrap().is_some());
}

#[test]
fn state_root_is_deterministic_across_replays() {
    let build = || {
        let (chain, store) = new_chain();
        let contract = storage_contract_script();
        let contract_hash = UInt160::from_script(&contract);
        let deploy = Transaction::new(
            1,
            TransactionData::Invocation {
                script: deploy_script(&contract),
                gas: Fixed8::from_int(500),
            },
        );
        chain.add_block(next_block(&chain, vec![deploy])).unwrap();
        let mut invoke_script = Vec::new();
        emit::appcall(&mut invoke_script, &contract_hash);
        let invoke = Transaction::new(
            1,
            TransactionData::Invocation {
                script: invoke_script,
                gas: Fixed8::ZERO,
            },
        );
        chain.add_block(next_block(&chain, vec![invoke])).unwrap();
        (chain.current_state_root(), store.snapshot())
    };

    let (root_a, store_a) = build();
    let (root_b, store_b) = build();
    assert!(!root_a.is_zero());
    assert_eq!(root_a, root_b);
    // Byte-identical stores after identical block sequences.
    assert_eq!(store_a, store_b);
}

#[test]
fn state_root_chains_across_heights() {
    let (chain, _) = new_chain();
    let root_0 = chain.state_root(0).unwrap().unwrap();

    let contract = storage_contract_script();
    let deploy = Transaction::new(
        1,
        TransactionData::Invocation {
            script: deploy_script(&contract),
            gas: Fixed8::from_int(500),
        },
    );
    chain.add_block(next_block(&chain, vec![deploy])).unwrap();
    let root_1 = chain.state_root(1).unwrap().unwrap();
    assert_eq!(root_0, root_1); // deployment writes no storage items

    let mut invoke_script = Vec::new();
    emit::appcall(&mut invoke_script, &UInt160::from_script(&contract));
    let invoke = Transaction::new(
        1,
        TransactionData::Invocation {
            script: invoke_script,
            gas: Fixed8::ZERO,
        },
    );
    chain.add_block(next_block(&chain, vec![invoke])).unwrap();
    let root_2 = chain.state_root(2).unwrap().unwrap();
    assert_ne!(root_1, root_2); // the Put landed in the trie
    assert_eq!(chain.current_state_root(), root_2);
}

#[test]
fn reserialized_block_is_byte_identical() {
    let (chain, _) = new_chain();
    chain.add_block(next_block(&chain, vec![])).unwrap();
    let block = chain.get_block(&chain.current_hash()).unwrap().unwrap();
    let bytes = neo2_io::to_bytes(&block);
    let reparsed: Block = neo2_io::from_bytes(&bytes).unwrap();
    assert_eq!(neo2_io::to_bytes(&reparsed), bytes);
}

#[test]
fn chain_dump_restore_round_trip() {
    let (chain, _) = new_chain();
    for _ in 0..3 {
        chain.add_block(next_block(&chain, vec![])).unwrap();
    }

    let mut dump = Vec::new();
    neo2_ledger::chaindump::dump(&chain, 0, 4, &mut dump).unwrap();

    let (fresh, _) = new_chain();
    let applied = neo2_ledger::chaindump::restore(&fresh, false, &mut dump.as_slice()).unwrap();
    assert_eq!(applied, 3);
    assert_eq!(fresh.block_height(), 3);
    assert_eq!(fresh.current_hash(), chain.current_hash());
    assert_eq!(fresh.current_state_root(), chain.current_state_root());
}

#[tokio::test]
async fn block_queue_reorders_out_of_order_blocks() {
    let (chain, _) = new_chain();
    let chain = Arc::new(chain);

    // Build three sequential blocks against a scratch copy of the chain.
    let (scratch, _) = new_chain();
    let mut blocks = Vec::new();
    for _ in 0..3 {
        let block = next_block(&scratch, vec![]);
        scratch.add_block(block.clone()).unwrap();
        blocks.push(block);
    }

    let queue = Arc::new(neo2_ledger::BlockQueue::new(Arc::clone(&chain), 16));
    let worker = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.run().await })
    };

    // Deliver out of order: 3, 2, then 1.
    queue.put(blocks[2].clone());
    queue.put(blocks[1].clone());
    assert_eq!(chain.block_height(), 0);
    queue.put(blocks[0].clone());

    for _ in 0..200 {
        if chain.block_height() == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(chain.block_height(), 3);

    queue.discard();
    worker.await.unwrap();

    // Stale blocks are dropped silently.
    queue.put(blocks[0].clone());
    assert!(queue.is_empty());
}
