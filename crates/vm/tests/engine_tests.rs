//! Script-level tests for the execution engine.

use neo2_vm::{emit, ExecutionEngine, NoSyscalls, OpCode, StackItem, VMState, VmError};

fn run(script: Vec<u8>) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new();
    engine.load_script(script).unwrap();
    engine.execute(&mut NoSyscalls);
    engine
}

fn run_expect_int(script: Vec<u8>, expected: i64) {
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt, "fault: {:?}", engine.fault_reason());
    let result = engine.result_stack().last().unwrap();
    assert_eq!(
        engine.arena().to_i64(result).unwrap(),
        expected,
        "result mismatch"
    );
}

#[test]
fn arithmetic_halts_with_result() {
    let mut script = Vec::new();
    emit::int(&mut script, 2);
    emit::int(&mut script, 3);
    emit::opcode(&mut script, OpCode::Add);
    run_expect_int(script, 5);
}

#[test]
fn division_by_zero_faults() {
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::int(&mut script, 0);
    emit::opcode(&mut script, OpCode::Div);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_reason(),
        Some(VmError::DivisionByZero)
    ));
}

#[test]
fn stack_underflow_faults() {
    let mut script = Vec::new();
    emit::opcode(&mut script, OpCode::Add);
    assert_eq!(run(script).state(), VMState::Fault);
}

#[test]
fn unknown_opcode_faults() {
    let engine = run(vec![0xfe]);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_reason(),
        Some(VmError::UnknownOpcode(0xfe))
    ));
}

#[test]
fn push_data_forms() {
    // PUSHDATA1 with 76 bytes, then SIZE.
    let mut script = Vec::new();
    emit::bytes(&mut script, &[7u8; 76]);
    emit::opcode(&mut script, OpCode::Size);
    run_expect_int(script, 76);
}

#[test]
fn jmp_skips_code() {
    // JMP +4 over a PUSH1, then PUSH2.
    let mut script = Vec::new();
    script.push(OpCode::Jmp as u8);
    script.extend_from_slice(&4i16.to_le_bytes());
    emit::int(&mut script, 1);
    emit::int(&mut script, 2);
    run_expect_int(script, 2);
    let engine = run({
        let mut s = Vec::new();
        s.push(OpCode::Jmp as u8);
        s.extend_from_slice(&4i16.to_le_bytes());
        emit::int(&mut s, 1);
        emit::int(&mut s, 2);
        s
    });
    assert_eq!(engine.result_stack().len(), 1);
}

#[test]
fn jmpif_takes_branch_on_true() {
    // PUSH1 JMPIF +4 ; PUSH5 ; PUSH9  -> only 9 on the stack
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    script.push(OpCode::JmpIf as u8);
    script.extend_from_slice(&4i16.to_le_bytes());
    emit::int(&mut script, 5);
    emit::int(&mut script, 9);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(engine.arena().to_i64(&engine.result_stack()[0]).unwrap(), 9);
}

#[test]
fn call_and_ret_return_to_caller() {
    // CALL +5; RET; (sub) PUSH7 RET
    // Layout: 0: CALL(3B) 3: RET 4: unreachable 5: PUSH7 6: RET
    let mut script = Vec::new();
    script.push(OpCode::Call as u8);
    script.extend_from_slice(&5i16.to_le_bytes());
    script.push(OpCode::Ret as u8);
    script.push(OpCode::Nop as u8);
    emit::int(&mut script, 7);
    script.push(OpCode::Ret as u8);
    run_expect_int(script, 7);
}

#[test]
fn invalid_jump_target_faults() {
    let mut script = Vec::new();
    script.push(OpCode::Jmp as u8);
    script.extend_from_slice(&(-20i16).to_le_bytes());
    assert_eq!(run(script).state(), VMState::Fault);
}

#[test]
fn string_ops() {
    let mut script = Vec::new();
    emit::bytes(&mut script, b"hello ");
    emit::bytes(&mut script, b"world");
    emit::opcode(&mut script, OpCode::Cat);
    emit::opcode(&mut script, OpCode::Size);
    run_expect_int(script, 11);

    let mut script = Vec::new();
    emit::bytes(&mut script, b"hello");
    emit::int(&mut script, 1);
    emit::int(&mut script, 3);
    emit::opcode(&mut script, OpCode::SubStr);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(
        engine.arena().to_bytes(&engine.result_stack()[0]).unwrap(),
        b"ell"
    );
}

#[test]
fn substr_out_of_range_faults() {
    let mut script = Vec::new();
    emit::bytes(&mut script, b"abc");
    emit::int(&mut script, 2);
    emit::int(&mut script, 5);
    emit::opcode(&mut script, OpCode::SubStr);
    assert_eq!(run(script).state(), VMState::Fault);
}

#[test]
fn array_lifecycle() {
    // NEWARRAY 2; DUP; 0; PUSH42; SETITEM; 0; PICKITEM
    let mut script = Vec::new();
    emit::int(&mut script, 2);
    emit::opcode(&mut script, OpCode::NewArray);
    emit::opcode(&mut script, OpCode::Dup);
    emit::int(&mut script, 0);
    emit::int(&mut script, 42);
    emit::opcode(&mut script, OpCode::SetItem);
    emit::int(&mut script, 0);
    emit::opcode(&mut script, OpCode::PickItem);
    run_expect_int(script, 42);
}

#[test]
fn array_identity_vs_struct_value_equality() {
    // Two equal-content NEWSTRUCTs are EQUAL; two NEWARRAYs are not.
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::opcode(&mut script, OpCode::NewStruct);
    emit::int(&mut script, 1);
    emit::opcode(&mut script, OpCode::NewStruct);
    emit::opcode(&mut script, OpCode::Equal);
    let engine = run(script);
    assert!(engine.arena().to_bool(&engine.result_stack()[0]));

    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::opcode(&mut script, OpCode::NewArray);
    emit::int(&mut script, 1);
    emit::opcode(&mut script, OpCode::NewArray);
    emit::opcode(&mut script, OpCode::Equal);
    let engine = run(script);
    assert!(!engine.arena().to_bool(&engine.result_stack()[0]));
}

#[test]
fn map_operations() {
    // m = {}; m["k"] = 7; HASKEY && PICKITEM
    let mut script = Vec::new();
    emit::opcode(&mut script, OpCode::NewMap);
    emit::opcode(&mut script, OpCode::Dup);
    emit::bytes(&mut script, b"k");
    emit::int(&mut script, 7);
    emit::opcode(&mut script, OpCode::SetItem);
    emit::opcode(&mut script, OpCode::Dup);
    emit::bytes(&mut script, b"k");
    emit::opcode(&mut script, OpCode::HasKey);
    emit::opcode(&mut script, OpCode::ThrowIfNot);
    emit::bytes(&mut script, b"k");
    emit::opcode(&mut script, OpCode::PickItem);
    run_expect_int(script, 7);
}

#[test]
fn oversized_array_faults() {
    let mut script = Vec::new();
    emit::int(&mut script, 1025);
    emit::opcode(&mut script, OpCode::NewArray);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_reason(),
        Some(VmError::CollectionTooLarge)
    ));
}

#[test]
fn stack_depth_limit_faults() {
    // An unrolled push loop cannot reach 2049, so use DUP in a JMP loop.
    // PUSH1; (DUP JMP -1) — duplicates until the stack limit trips.
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::opcode(&mut script, OpCode::Dup);
    script.push(OpCode::Jmp as u8);
    script.extend_from_slice(&(-1i16).to_le_bytes());
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(engine.fault_reason(), Some(VmError::StackOverflow)));
}

#[test]
fn gas_exhaustion_faults() {
    let mut script = Vec::new();
    emit::int(&mut script, 0);
    // Endless INC loop.
    emit::opcode(&mut script, OpCode::Inc);
    script.push(OpCode::Jmp as u8);
    script.extend_from_slice(&(-1i16).to_le_bytes());

    let mut engine = ExecutionEngine::new();
    engine.set_gas_limit(1000);
    engine.load_script(script).unwrap();
    assert_eq!(engine.execute(&mut NoSyscalls), VMState::Fault);
    assert!(matches!(engine.fault_reason(), Some(VmError::GasExhausted)));
}

#[test]
fn throw_faults() {
    let engine = run(vec![OpCode::Throw as u8]);
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn throwifnot_passes_on_true() {
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::opcode(&mut script, OpCode::ThrowIfNot);
    emit::int(&mut script, 99);
    run_expect_int(script, 99);
}

#[test]
fn alt_stack_round_trip() {
    let mut script = Vec::new();
    emit::int(&mut script, 5);
    emit::opcode(&mut script, OpCode::ToAltStack);
    emit::opcode(&mut script, OpCode::DupFromAltStack);
    emit::opcode(&mut script, OpCode::FromAltStack);
    emit::opcode(&mut script, OpCode::Add);
    run_expect_int(script, 10);
}

#[test]
fn roll_and_pick() {
    // 1 2 3, ROLL 2 -> 2 3 1
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::int(&mut script, 2);
    emit::int(&mut script, 3);
    emit::int(&mut script, 2);
    emit::opcode(&mut script, OpCode::Roll);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    let values: Vec<i64> = engine
        .result_stack()
        .iter()
        .map(|i| engine.arena().to_i64(i).unwrap())
        .collect();
    assert_eq!(values, vec![2, 3, 1]);
}

#[test]
fn pack_unpack_round_trip() {
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::int(&mut script, 2);
    emit::int(&mut script, 2);
    emit::opcode(&mut script, OpCode::Pack);
    emit::opcode(&mut script, OpCode::Unpack);
    // Stack now: 1 2 2 (count on top).
    let engine = run(script);
    let values: Vec<i64> = engine
        .result_stack()
        .iter()
        .map(|i| engine.arena().to_i64(i).unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 2]);
}

#[test]
fn within_bounds() {
    let mut script = Vec::new();
    emit::int(&mut script, 5);
    emit::int(&mut script, 1);
    emit::int(&mut script, 6);
    emit::opcode(&mut script, OpCode::Within);
    let engine = run(script);
    assert!(engine.arena().to_bool(&engine.result_stack()[0]));
}

#[test]
fn hash_opcodes_match_crypto_crate() {
    let mut script = Vec::new();
    emit::bytes(&mut script, b"data");
    emit::opcode(&mut script, OpCode::Hash256);
    let engine = run(script);
    assert_eq!(
        engine.arena().to_bytes(&engine.result_stack()[0]).unwrap(),
        neo2_crypto::hash256(b"data").to_vec()
    );
}

#[test]
fn checksig_verifies_bound_digest() {
    let pair = neo2_crypto::KeyPair::generate();
    let digest = neo2_crypto::double_sha256(b"tx body");
    let signature = pair.sign_hash(&digest).unwrap();

    let mut script = Vec::new();
    emit::bytes(&mut script, signature.as_bytes());
    emit::bytes(&mut script, &pair.public_key().to_bytes());
    emit::opcode(&mut script, OpCode::CheckSig);

    let mut engine = ExecutionEngine::new();
    engine.set_checked_hash(digest);
    engine.load_script(script).unwrap();
    assert_eq!(engine.execute(&mut NoSyscalls), VMState::Halt);
    assert!(engine.arena().to_bool(&engine.result_stack()[0]));
}

#[test]
fn checksig_rejects_wrong_digest() {
    let pair = neo2_crypto::KeyPair::generate();
    let signature = pair
        .sign_hash(&neo2_crypto::double_sha256(b"other body"))
        .unwrap();

    let mut script = Vec::new();
    emit::bytes(&mut script, signature.as_bytes());
    emit::bytes(&mut script, &pair.public_key().to_bytes());
    emit::opcode(&mut script, OpCode::CheckSig);

    let mut engine = ExecutionEngine::new();
    engine.set_checked_hash(neo2_crypto::double_sha256(b"tx body"));
    engine.load_script(script).unwrap();
    engine.execute(&mut NoSyscalls);
    assert!(!engine.arena().to_bool(&engine.result_stack()[0]));
}

#[test]
fn checkmultisig_two_of_three() {
    let digest = neo2_crypto::double_sha256(b"payload");
    let mut pairs: Vec<neo2_crypto::KeyPair> =
        (0..3).map(|_| neo2_crypto::KeyPair::generate()).collect();
    pairs.sort_by_key(|p| p.public_key().to_bytes());

    // Sign with keys 0 and 2; signatures pushed in key order.
    let sig0 = pairs[0].sign_hash(&digest).unwrap();
    let sig2 = pairs[2].sign_hash(&digest).unwrap();

    let mut script = Vec::new();
    emit::bytes(&mut script, sig0.as_bytes());
    emit::bytes(&mut script, sig2.as_bytes());
    emit::int(&mut script, 2);
    for pair in &pairs {
        emit::bytes(&mut script, &pair.public_key().to_bytes());
    }
    emit::int(&mut script, 3);
    emit::opcode(&mut script, OpCode::CheckMultiSig);

    let mut engine = ExecutionEngine::new();
    engine.set_checked_hash(digest);
    engine.load_script(script).unwrap();
    assert_eq!(engine.execute(&mut NoSyscalls), VMState::Halt);
    assert!(engine.arena().to_bool(&engine.result_stack()[0]));
}

#[test]
fn checkmultisig_rejects_out_of_order_signatures() {
    let digest = neo2_crypto::double_sha256(b"payload");
    let mut pairs: Vec<neo2_crypto::KeyPair> =
        (0..3).map(|_| neo2_crypto::KeyPair::generate()).collect();
    pairs.sort_by_key(|p| p.public_key().to_bytes());

    let sig0 = pairs[0].sign_hash(&digest).unwrap();
    let sig2 = pairs[2].sign_hash(&digest).unwrap();

    // Reversed signature order must fail.
    let mut script = Vec::new();
    emit::bytes(&mut script, sig2.as_bytes());
    emit::bytes(&mut script, sig0.as_bytes());
    emit::int(&mut script, 2);
    for pair in &pairs {
        emit::bytes(&mut script, &pair.public_key().to_bytes());
    }
    emit::int(&mut script, 3);
    emit::opcode(&mut script, OpCode::CheckMultiSig);

    let mut engine = ExecutionEngine::new();
    engine.set_checked_hash(digest);
    engine.load_script(script).unwrap();
    engine.execute(&mut NoSyscalls);
    assert!(!engine.arena().to_bool(&engine.result_stack()[0]));
}

#[test]
fn unknown_syscall_faults() {
    let mut script = Vec::new();
    emit::syscall(&mut script, "Neo.Does.NotExist");
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_reason(),
        Some(VmError::UnknownSyscall(_))
    ));
}

#[test]
fn item_size_limit_faults() {
    // CAT a 1MiB item with itself.
    let mut script = Vec::new();
    let big = vec![0u8; 600_000];
    emit::bytes(&mut script, &big);
    emit::opcode(&mut script, OpCode::Dup);
    emit::opcode(&mut script, OpCode::Cat);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(engine.fault_reason(), Some(VmError::ItemTooLarge)));
}

#[test]
fn cancellation_flag_stops_execution() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let mut script = Vec::new();
    emit::opcode(&mut script, OpCode::Nop);
    script.push(OpCode::Jmp as u8);
    script.extend_from_slice(&(-1i16).to_le_bytes());

    let flag = Arc::new(AtomicBool::new(true));
    flag.store(true, Ordering::Relaxed);

    let mut engine = ExecutionEngine::new();
    engine.set_cancel_flag(flag);
    engine.load_script(script).unwrap();
    assert_eq!(engine.execute(&mut NoSyscalls), VMState::Fault);
    assert!(matches!(engine.fault_reason(), Some(VmError::Cancelled)));
}

#[test]
fn empty_script_halts_with_empty_result() {
    let engine = run(Vec::new());
    assert_eq!(engine.state(), VMState::Halt);
    assert!(engine.result_stack().is_empty());
}

#[test]
fn result_stack_is_final_eval_stack() {
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::int(&mut script, 2);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(engine.result_stack().len(), 2);
}

#[test]
fn negative_integer_byte_round_trip() {
    let mut script = Vec::new();
    emit::int(&mut script, -128);
    emit::opcode(&mut script, OpCode::Negate);
    run_expect_int(script, 128);
}

#[test]
fn shl_bounds_enforced() {
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::int(&mut script, 257);
    emit::opcode(&mut script, OpCode::Shl);
    assert_eq!(run(script).state(), VMState::Fault);
}

#[test]
fn integer_width_limit() {
    // 1 << 256 has 33 bytes; the result check must fault.
    let mut script = Vec::new();
    emit::int(&mut script, 1);
    emit::int(&mut script, 256);
    emit::opcode(&mut script, OpCode::Shl);
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_reason(),
        Some(VmError::IntegerTooLarge)
    ));
}

#[test]
fn serialized_item_round_trip_via_stack_item() {
    // deserialize(serialize(x)) == x for a non-cyclic container.
    let mut engine = ExecutionEngine::new();
    let arena = engine.arena_mut();
    let inner = arena.alloc_list(vec![StackItem::int(5), StackItem::ByteArray(b"x".to_vec())]);
    let item = StackItem::Struct(inner);
    let bytes = neo2_vm::serialization::serialize_item(arena, &item).unwrap();
    let back = neo2_vm::serialization::deserialize_item(arena, &bytes).unwrap();
    assert!(engine.arena().equals(&item, &back).unwrap());
}
