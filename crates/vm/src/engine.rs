//! The execution engine: invocation stack, dispatch loop, gas accounting.

use crate::context::ExecutionContext;
use crate::error::{VmError, VmResult};
use crate::gas::opcode_price;
use crate::interop::SyscallHandler;
use crate::opcode::OpCode;
use crate::stack_item::{ItemArena, StackItem};
use crate::{ExecutionLimits, VMState};
use neo2_core::UInt160;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const MAX_SHIFT: i64 = 256;

/// A deterministic interpreter over loaded scripts.
///
/// The engine is strictly single-threaded and holds no shared state; hosts
/// interact only through the [`SyscallHandler`] passed to [`execute`] and
/// the copied result stack after halting.
///
/// [`execute`]: ExecutionEngine::execute
pub struct ExecutionEngine {
    state: VMState,
    contexts: Vec<ExecutionContext>,
    arena: ItemArena,
    result_stack: Vec<StackItem>,
    limits: ExecutionLimits,
    stack_count: usize,
    gas_consumed: i64,
    gas_limit: Option<i64>,
    checked_hash: Option<[u8; 32]>,
    cancel: Option<Arc<AtomicBool>>,
    fault_reason: Option<VmError>,
}

impl ExecutionEngine {
    /// Creates an engine with default limits and nothing loaded.
    pub fn new() -> Self {
        Self::with_limits(ExecutionLimits::default())
    }

    /// Creates an engine with explicit limits.
    pub fn with_limits(limits: ExecutionLimits) -> Self {
        ExecutionEngine {
            state: VMState::None,
            contexts: Vec::new(),
            arena: ItemArena::new(),
            result_stack: Vec::new(),
            limits,
            stack_count: 0,
            gas_consumed: 0,
            gas_limit: None,
            checked_hash: None,
            cancel: None,
            fault_reason: None,
        }
    }

    /// Current machine state.
    pub fn state(&self) -> VMState {
        self.state
    }

    /// Why the machine faulted, when it did.
    pub fn fault_reason(&self) -> Option<&VmError> {
        self.fault_reason.as_ref()
    }

    /// Gas consumed so far.
    pub fn gas_consumed(&self) -> i64 {
        self.gas_consumed
    }

    /// Caps total gas; exceeding it faults with `GasExhausted`.
    pub fn set_gas_limit(&mut self, limit: i64) {
        self.gas_limit = Some(limit);
    }

    /// Binds the digest `CHECKSIG`/`CHECKMULTISIG` verify against.
    pub fn set_checked_hash(&mut self, digest: [u8; 32]) {
        self.checked_hash = Some(digest);
    }

    /// Installs an external cancellation flag, polled between opcodes.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// The container arena.
    pub fn arena(&self) -> &ItemArena {
        &self.arena
    }

    /// Mutable access to the container arena (used by syscall handlers).
    pub fn arena_mut(&mut self) -> &mut ItemArena {
        &mut self.arena
    }

    /// Items left on the result stack after `Halt`; index 0 is the bottom.
    pub fn result_stack(&self) -> &[StackItem] {
        &self.result_stack
    }

    /// Script hash of the currently executing context.
    pub fn current_script_hash(&self) -> Option<UInt160> {
        self.contexts.last().map(|c| c.script_hash())
    }

    /// Script hash of the calling context, when there is one.
    pub fn calling_script_hash(&self) -> Option<UInt160> {
        if self.contexts.len() >= 2 {
            Some(self.contexts[self.contexts.len() - 2].script_hash())
        } else {
            None
        }
    }

    /// Script hash of the entry (outermost) context.
    pub fn entry_script_hash(&self) -> Option<UInt160> {
        self.contexts.first().map(|c| c.script_hash())
    }

    /// Loads a script as the new current context.
    pub fn load_script(&mut self, script: Vec<u8>) -> VmResult<()> {
        if self.contexts.len() >= self.limits.max_invocation_depth {
            return Err(VmError::TooManyContexts);
        }
        self.contexts.push(ExecutionContext::new(script));
        Ok(())
    }

    /// Pushes onto the current evaluation stack, honoring the depth limit.
    pub fn push(&mut self, item: StackItem) -> VmResult<()> {
        if self.stack_count >= self.limits.max_stack_size {
            return Err(VmError::StackOverflow);
        }
        if self.arena.byte_len(&item) > self.limits.max_item_size {
            return Err(VmError::ItemTooLarge);
        }
        let context = self.current_context_mut()?;
        context.eval.push(item);
        self.stack_count += 1;
        Ok(())
    }

    /// Pops from the current evaluation stack.
    pub fn pop(&mut self) -> VmResult<StackItem> {
        let context = self.current_context_mut()?;
        let item = context.eval.pop().ok_or(VmError::StackUnderflow)?;
        self.stack_count -= 1;
        Ok(item)
    }

    /// Pops and converts to an i64.
    pub fn pop_i64(&mut self) -> VmResult<i64> {
        let item = self.pop()?;
        self.arena.to_i64(&item)
    }

    /// Pops and converts to bytes.
    pub fn pop_bytes(&mut self) -> VmResult<Vec<u8>> {
        let item = self.pop()?;
        self.arena.to_bytes(&item)
    }

    /// Pops and converts to an unbounded integer.
    pub fn pop_int(&mut self) -> VmResult<BigInt> {
        let item = self.pop()?;
        let value = self.arena.to_int(&item)?;
        self.check_integer(&value)?;
        Ok(value)
    }

    /// Pops and converts to a boolean.
    pub fn pop_bool(&mut self) -> VmResult<bool> {
        let item = self.pop()?;
        Ok(self.arena.to_bool(&item))
    }

    /// Reference to the item `depth` entries below the top.
    pub fn peek(&self, depth: usize) -> VmResult<&StackItem> {
        let context = self.current_context()?;
        if depth >= context.eval.len() {
            return Err(VmError::StackUnderflow);
        }
        Ok(&context.eval[context.eval.len() - 1 - depth])
    }

    fn current_context(&self) -> VmResult<&ExecutionContext> {
        self.contexts.last().ok_or(VmError::StackUnderflow)
    }

    fn current_context_mut(&mut self) -> VmResult<&mut ExecutionContext> {
        self.contexts.last_mut().ok_or(VmError::StackUnderflow)
    }

    fn check_integer(&self, value: &BigInt) -> VmResult<()> {
        if crate::stack_item::int_to_bytes(value).len() > self.limits.max_integer_size {
            return Err(VmError::IntegerTooLarge);
        }
        Ok(())
    }

    fn push_int(&mut self, value: BigInt) -> VmResult<()> {
        self.check_integer(&value)?;
        self.push(StackItem::Integer(value))
    }

    /// Charges extra gas from a syscall handler (e.g. storage rent).
    pub fn charge(&mut self, amount: i64) -> VmResult<()> {
        self.add_gas(amount)
    }

    /// Current invocation-stack depth.
    pub fn context_depth(&self) -> usize {
        self.contexts.len()
    }

    fn add_gas(&mut self, amount: i64) -> VmResult<()> {
        self.gas_consumed = self.gas_consumed.saturating_add(amount);
        if let Some(limit) = self.gas_limit {
            if self.gas_consumed > limit {
                return Err(VmError::GasExhausted);
            }
        }
        Ok(())
    }

    /// Runs to `Halt` or `Fault` with the given host.
    pub fn execute(&mut self, handler: &mut dyn SyscallHandler) -> VMState {
        if self.contexts.is_empty() {
            self.state = VMState::Fault;
            self.fault_reason = Some(VmError::InvalidInstructionPointer(0));
            return self.state;
        }
        self.state = VMState::None;
        while self.state == VMState::None {
            if let Err(err) = self.step(handler) {
                debug!(error = %err, "vm fault");
                self.fault_reason = Some(err);
                self.state = VMState::Fault;
            }
        }
        self.state
    }

    /// Executes one instruction.
    fn step(&mut self, handler: &mut dyn SyscallHandler) -> VmResult<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(VmError::Cancelled);
            }
        }

        // Running off the script end is an implicit RET.
        if self.current_context()?.at_end() {
            return self.op_ret(handler);
        }

        let ip = self.current_context()?.ip;
        let raw = self.read_u8()?;
        let op = OpCode::from_byte(raw)?;
        self.add_gas(opcode_price(op, raw))?;

        match op {
            OpCode::Push0 => self.push(StackItem::ByteArray(Vec::new()))?,
            OpCode::PushBytes1 => {
                let data = self.read_operand(raw as usize)?;
                self.push(StackItem::ByteArray(data))?;
            }
            OpCode::PushData1 => {
                let len = self.read_u8()? as usize;
                let data = self.read_operand(len)?;
                self.push(StackItem::ByteArray(data))?;
            }
            OpCode::PushData2 => {
                let len = self.read_u16()? as usize;
                let data = self.read_operand(len)?;
                self.push(StackItem::ByteArray(data))?;
            }
            OpCode::PushData4 => {
                let len = self.read_u32()? as usize;
                if len > self.limits.max_item_size {
                    return Err(VmError::ItemTooLarge);
                }
                let data = self.read_operand(len)?;
                self.push(StackItem::ByteArray(data))?;
            }
            OpCode::PushM1 => self.push(StackItem::int(-1))?,
            OpCode::Push1
            | OpCode::Push2
            | OpCode::Push3
            | OpCode::Push4
            | OpCode::Push5
            | OpCode::Push6
            | OpCode::Push7
            | OpCode::Push8
            | OpCode::Push9
            | OpCode::Push10
            | OpCode::Push11
            | OpCode::Push12
            | OpCode::Push13
            | OpCode::Push14
            | OpCode::Push15
            | OpCode::Push16 => self.push(StackItem::int(i64::from(raw - 0x50)))?,

            OpCode::Nop => {}
            OpCode::Jmp => {
                let target = self.read_jump_target(ip)?;
                self.jump(target)?;
            }
            OpCode::JmpIf => {
                let target = self.read_jump_target(ip)?;
                if self.pop_bool()? {
                    self.jump(target)?;
                }
            }
            OpCode::JmpIfNot => {
                let target = self.read_jump_target(ip)?;
                if !self.pop_bool()? {
                    self.jump(target)?;
                }
            }
            OpCode::Call => {
                let target = self.read_jump_target(ip)?;
                self.op_call(target)?;
            }
            OpCode::Ret => self.op_ret(handler)?,
            OpCode::AppCall => self.op_appcall(handler, false)?,
            OpCode::TailCall => self.op_appcall(handler, true)?,
            OpCode::Syscall => {
                let len = self.read_u8()? as usize;
                let name_bytes = self.read_operand(len)?;
                let name = String::from_utf8(name_bytes)
                    .map_err(|_| VmError::BadScript("non-utf8 syscall name".into()))?;
                self.add_gas(handler.price(&name))?;
                handler.invoke(&name, self)?;
            }

            OpCode::DupFromAltStack => {
                let item = self
                    .current_context()?
                    .alt
                    .last()
                    .cloned()
                    .ok_or(VmError::StackUnderflow)?;
                self.push(item)?;
            }
            OpCode::ToAltStack => {
                let item = self.pop()?;
                self.current_context_mut()?.alt.push(item);
                self.stack_count += 1;
            }
            OpCode::FromAltStack => {
                let item = self
                    .current_context_mut()?
                    .alt
                    .pop()
                    .ok_or(VmError::StackUnderflow)?;
                self.stack_count -= 1;
                self.push(item)?;
            }
            OpCode::XDrop => {
                let n = self.pop_i64()?;
                self.remove_at(n)?;
            }
            OpCode::XSwap => {
                let n = self.pop_i64()?;
                if n < 0 {
                    return Err(VmError::IndexOutOfBounds { index: n, len: 0 });
                }
                if n > 0 {
                    let context = self.current_context_mut()?;
                    let len = context.eval.len();
                    if n as usize >= len {
                        return Err(VmError::StackUnderflow);
                    }
                    context.eval.swap(len - 1, len - 1 - n as usize);
                }
            }
            OpCode::XTuck => {
                let n = self.pop_i64()?;
                if n < 0 {
                    return Err(VmError::IndexOutOfBounds { index: n, len: 0 });
                }
                let top = self.peek(0)?.clone();
                if self.stack_count >= self.limits.max_stack_size {
                    return Err(VmError::StackOverflow);
                }
                let context = self.current_context_mut()?;
                let len = context.eval.len();
                if n as usize > len {
                    return Err(VmError::StackUnderflow);
                }
                context.eval.insert(len - n as usize, top);
                self.stack_count += 1;
            }
            OpCode::Depth => {
                let depth = self.current_context()?.eval.len();
                self.push(StackItem::int(depth as i64))?;
            }
            OpCode::Drop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let top = self.peek(0)?.clone();
                self.push(top)?;
            }
            OpCode::Nip => {
                self.remove_at(1)?;
            }
            OpCode::Over => {
                let second = self.peek(1)?.clone();
                self.push(second)?;
            }
            OpCode::Pick => {
                let n = self.pop_i64()?;
                if n < 0 {
                    return Err(VmError::IndexOutOfBounds { index: n, len: 0 });
                }
                let item = self.peek(n as usize)?.clone();
                self.push(item)?;
            }
            OpCode::Roll => {
                let n = self.pop_i64()?;
                if n < 0 {
                    return Err(VmError::IndexOutOfBounds { index: n, len: 0 });
                }
                if n > 0 {
                    let item = self.take_at(n as usize)?;
                    self.current_context_mut()?.eval.push(item);
                }
            }
            OpCode::Rot => {
                let item = self.take_at(2)?;
                self.current_context_mut()?.eval.push(item);
            }
            OpCode::Swap => {
                let context = self.current_context_mut()?;
                let len = context.eval.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow);
                }
                context.eval.swap(len - 1, len - 2);
            }
            OpCode::Tuck => {
                let top = self.peek(0)?.clone();
                if self.stack_count >= self.limits.max_stack_size {
                    return Err(VmError::StackOverflow);
                }
                let context = self.current_context_mut()?;
                let len = context.eval.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow);
                }
                context.eval.insert(len - 2, top);
                self.stack_count += 1;
            }

            OpCode::Cat => {
                let b = self.pop_bytes()?;
                let mut a = self.pop_bytes()?;
                if a.len() + b.len() > self.limits.max_item_size {
                    return Err(VmError::ItemTooLarge);
                }
                a.extend_from_slice(&b);
                self.push(StackItem::ByteArray(a))?;
            }
            OpCode::SubStr => {
                let count = self.pop_i64()?;
                let index = self.pop_i64()?;
                let data = self.pop_bytes()?;
                if index < 0 || count < 0 || (index + count) as usize > data.len() {
                    return Err(VmError::IndexOutOfBounds {
                        index,
                        len: data.len(),
                    });
                }
                let slice = data[index as usize..(index + count) as usize].to_vec();
                self.push(StackItem::ByteArray(slice))?;
            }
            OpCode::Left => {
                let count = self.pop_i64()?;
                let data = self.pop_bytes()?;
                if count < 0 || count as usize > data.len() {
                    return Err(VmError::IndexOutOfBounds {
                        index: count,
                        len: data.len(),
                    });
                }
                self.push(StackItem::ByteArray(data[..count as usize].to_vec()))?;
            }
            OpCode::Right => {
                let count = self.pop_i64()?;
                let data = self.pop_bytes()?;
                if count < 0 || count as usize > data.len() {
                    return Err(VmError::IndexOutOfBounds {
                        index: count,
                        len: data.len(),
                    });
                }
                self.push(StackItem::ByteArray(
                    data[data.len() - count as usize..].to_vec(),
                ))?;
            }
            OpCode::Size => {
                let data = self.pop_bytes()?;
                self.push(StackItem::int(data.len() as i64))?;
            }

            OpCode::Invert => {
                let value = self.pop_int()?;
                self.push_int(!value)?;
            }
            OpCode::And => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a & b)?;
            }
            OpCode::Or => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a | b)?;
            }
            OpCode::Xor => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a ^ b)?;
            }
            OpCode::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                let eq = self.arena.equals(&a, &b)?;
                self.push(StackItem::Boolean(eq))?;
            }

            OpCode::Inc => {
                let value = self.pop_int()?;
                self.push_int(value + 1)?;
            }
            OpCode::Dec => {
                let value = self.pop_int()?;
                self.push_int(value - 1)?;
            }
            OpCode::Sign => {
                let value = self.pop_int()?;
                self.push(StackItem::int(i64::from(value.signum().to_i8().unwrap_or(0))))?;
            }
            OpCode::Negate => {
                let value = self.pop_int()?;
                self.push_int(-value)?;
            }
            OpCode::Abs => {
                let value = self.pop_int()?;
                self.push_int(value.abs())?;
            }
            OpCode::Not => {
                let value = self.pop_bool()?;
                self.push(StackItem::Boolean(!value))?;
            }
            OpCode::Nz => {
                let value = self.pop_int()?;
                self.push(StackItem::Boolean(!value.is_zero()))?;
            }
            OpCode::Add => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a + b)?;
            }
            OpCode::Sub => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a - b)?;
            }
            OpCode::Mul => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a * b)?;
            }
            OpCode::Div => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if b.is_zero() {
                    return Err(VmError::DivisionByZero);
                }
                self.push_int(a / b)?;
            }
            OpCode::Mod => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if b.is_zero() {
                    return Err(VmError::DivisionByZero);
                }
                self.push_int(a % b)?;
            }
            OpCode::Shl => {
                let shift = self.pop_i64()?;
                let value = self.pop_int()?;
                if !(0..=MAX_SHIFT).contains(&shift) {
                    return Err(VmError::IndexOutOfBounds {
                        index: shift,
                        len: MAX_SHIFT as usize,
                    });
                }
                self.push_int(value << shift as usize)?;
            }
            OpCode::Shr => {
                let shift = self.pop_i64()?;
                let value = self.pop_int()?;
                if !(0..=MAX_SHIFT).contains(&shift) {
                    return Err(VmError::IndexOutOfBounds {
                        index: shift,
                        len: MAX_SHIFT as usize,
                    });
                }
                self.push_int(value >> shift as usize)?;
            }
            OpCode::BoolAnd => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(StackItem::Boolean(a && b))?;
            }
            OpCode::BoolOr => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(StackItem::Boolean(a || b))?;
            }
            OpCode::NumEqual => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(StackItem::Boolean(a == b))?;
            }
            OpCode::NumNotEqual => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(StackItem::Boolean(a != b))?;
            }
            OpCode::Lt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(StackItem::Boolean(a < b))?;
            }
            OpCode::Gt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(StackItem::Boolean(a > b))?;
            }
            OpCode::Lte => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(StackItem::Boolean(a <= b))?;
            }
            OpCode::Gte => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(StackItem::Boolean(a >= b))?;
            }
            OpCode::Min => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a.min(b))?;
            }
            OpCode::Max => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push_int(a.max(b))?;
            }
            OpCode::Within => {
                let upper = self.pop_int()?;
                let lower = self.pop_int()?;
                let value = self.pop_int()?;
                self.push(StackItem::Boolean(value >= lower && value < upper))?;
            }

            OpCode::Sha1 => {
                let data = self.pop_bytes()?;
                let digest: [u8; 20] = Sha1::digest(&data).into();
                self.push(StackItem::ByteArray(digest.to_vec()))?;
            }
            OpCode::Sha256 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::ByteArray(neo2_crypto::sha256(&data).to_vec()))?;
            }
            OpCode::Hash160 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::ByteArray(neo2_crypto::hash160(&data).to_vec()))?;
            }
            OpCode::Hash256 => {
                let data = self.pop_bytes()?;
                self.push(StackItem::ByteArray(neo2_crypto::hash256(&data).to_vec()))?;
            }
            OpCode::CheckSig => self.op_checksig()?,
            OpCode::Verify => self.op_verify()?,
            OpCode::CheckMultiSig => self.op_checkmultisig()?,

            OpCode::ArraySize => {
                let item = self.pop()?;
                let size = match &item {
                    StackItem::Array(h) | StackItem::Struct(h) => self.arena.list(*h)?.len(),
                    StackItem::Map(h) => self.arena.map(*h)?.len(),
                    other => self.arena.to_bytes(other)?.len(),
                };
                self.push(StackItem::int(size as i64))?;
            }
            OpCode::Pack => {
                let n = self.pop_i64()?;
                if n < 0 || n as usize > self.limits.max_array_size {
                    return Err(VmError::CollectionTooLarge);
                }
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(self.pop()?);
                }
                let handle = self.arena.alloc_list(items);
                self.push(StackItem::Array(handle))?;
            }
            OpCode::Unpack => {
                let item = self.pop()?;
                let StackItem::Array(handle) = item else {
                    return Err(VmError::TypeMismatch { expected: "array" });
                };
                let items = self.arena.list(handle)?.clone();
                let count = items.len();
                for element in items.into_iter().rev() {
                    self.push(element)?;
                }
                self.push(StackItem::int(count as i64))?;
            }
            OpCode::PickItem => self.op_pickitem()?,
            OpCode::SetItem => self.op_setitem()?,
            OpCode::NewArray => self.op_newcollection(false)?,
            OpCode::NewStruct => self.op_newcollection(true)?,
            OpCode::NewMap => {
                let handle = self.arena.alloc_map();
                self.push(StackItem::Map(handle))?;
            }
            OpCode::Append => {
                let value = self.pop()?;
                let target = self.pop()?;
                let value = match value {
                    StackItem::Struct(_) => self.arena.deep_copy(&value)?,
                    other => other,
                };
                let handle = match target {
                    StackItem::Array(h) | StackItem::Struct(h) => h,
                    _ => return Err(VmError::TypeMismatch { expected: "array" }),
                };
                if self.arena.list(handle)?.len() >= self.limits.max_array_size {
                    return Err(VmError::CollectionTooLarge);
                }
                self.arena.list_mut(handle)?.push(value);
            }
            OpCode::Reverse => {
                let target = self.pop()?;
                let handle = match target {
                    StackItem::Array(h) | StackItem::Struct(h) => h,
                    _ => return Err(VmError::TypeMismatch { expected: "array" }),
                };
                self.arena.list_mut(handle)?.reverse();
            }
            OpCode::Remove => {
                let key = self.pop()?;
                let target = self.pop()?;
                match target {
                    StackItem::Array(h) | StackItem::Struct(h) => {
                        let index = self.arena.to_i64(&key)?;
                        let len = self.arena.list(h)?.len();
                        if index < 0 || index as usize >= len {
                            return Err(VmError::IndexOutOfBounds { index, len });
                        }
                        self.arena.list_mut(h)?.remove(index as usize);
                    }
                    StackItem::Map(h) => {
                        self.arena.map_remove(h, &key)?;
                    }
                    _ => return Err(VmError::TypeMismatch { expected: "collection" }),
                }
            }
            OpCode::HasKey => {
                let key = self.pop()?;
                let target = self.pop()?;
                let found = match target {
                    StackItem::Array(h) | StackItem::Struct(h) => {
                        let index = self.arena.to_i64(&key)?;
                        if index < 0 {
                            return Err(VmError::IndexOutOfBounds { index, len: 0 });
                        }
                        (index as usize) < self.arena.list(h)?.len()
                    }
                    StackItem::Map(h) => self.arena.map_get(h, &key)?.is_some(),
                    _ => return Err(VmError::TypeMismatch { expected: "collection" }),
                };
                self.push(StackItem::Boolean(found))?;
            }
            OpCode::Keys => {
                let target = self.pop()?;
                let StackItem::Map(handle) = target else {
                    return Err(VmError::TypeMismatch { expected: "map" });
                };
                let keys: Vec<StackItem> =
                    self.arena.map(handle)?.iter().map(|(k, _)| k.clone()).collect();
                let out = self.arena.alloc_list(keys);
                self.push(StackItem::Array(out))?;
            }
            OpCode::Values => {
                let target = self.pop()?;
                let values: Vec<StackItem> = match target {
                    StackItem::Array(h) | StackItem::Struct(h) => self.arena.list(h)?.clone(),
                    StackItem::Map(h) => {
                        self.arena.map(h)?.iter().map(|(_, v)| v.clone()).collect()
                    }
                    _ => return Err(VmError::TypeMismatch { expected: "collection" }),
                };
                let out = self.arena.alloc_list(values);
                self.push(StackItem::Array(out))?;
            }

            OpCode::Throw => return Err(VmError::Throw),
            OpCode::ThrowIfNot => {
                if !self.pop_bool()? {
                    return Err(VmError::Throw);
                }
            }
        }

        if self.contexts.is_empty() && self.state == VMState::None {
            self.state = VMState::Halt;
        }
        Ok(())
    }

    // ---- operand reading -------------------------------------------------

    fn read_u8(&mut self) -> VmResult<u8> {
        let context = self.current_context_mut()?;
        let byte = *context
            .script()
            .get(context.ip)
            .ok_or(VmError::InvalidInstructionPointer(context.ip))?;
        context.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> VmResult<u16> {
        let bytes = self.read_operand(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> VmResult<u32> {
        let bytes = self.read_operand(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_operand(&mut self, len: usize) -> VmResult<Vec<u8>> {
        let context = self.current_context_mut()?;
        let end = context
            .ip
            .checked_add(len)
            .ok_or(VmError::InvalidInstructionPointer(context.ip))?;
        if end > context.script().len() {
            return Err(VmError::InvalidInstructionPointer(context.ip));
        }
        let data = context.script()[context.ip..end].to_vec();
        context.ip = end;
        Ok(data)
    }

    /// Reads a 2-byte signed offset relative to the instruction start.
    fn read_jump_target(&mut self, instruction_start: usize) -> VmResult<usize> {
        let bytes = self.read_operand(2)?;
        let offset = i16::from_le_bytes([bytes[0], bytes[1]]) as isize;
        let target = instruction_start as isize + offset;
        let len = self.current_context()?.script().len() as isize;
        if target < 0 || target > len {
            return Err(VmError::InvalidInstructionPointer(target.unsigned_abs()));
        }
        Ok(target as usize)
    }

    fn jump(&mut self, target: usize) -> VmResult<()> {
        self.current_context_mut()?.ip = target;
        Ok(())
    }

    // ---- flow helpers ----------------------------------------------------

    fn op_call(&mut self, target: usize) -> VmResult<()> {
        if self.contexts.len() >= self.limits.max_invocation_depth {
            return Err(VmError::TooManyContexts);
        }
        let caller = self.current_context_mut()?;
        let script = caller.script().to_vec();
        let eval = std::mem::take(&mut caller.eval);
        let alt = std::mem::take(&mut caller.alt);
        let mut callee = ExecutionContext::new(script);
        callee.ip = target;
        callee.eval = eval;
        callee.alt = alt;
        self.contexts.push(callee);
        Ok(())
    }

    fn op_ret(&mut self, handler: &mut dyn SyscallHandler) -> VmResult<()> {
        let mut finished = self.contexts.pop().ok_or(VmError::StackUnderflow)?;
        self.stack_count -= finished.alt.len();
        finished.alt.clear();
        match self.contexts.last_mut() {
            Some(parent) => {
                parent.eval.append(&mut finished.eval);
            }
            None => {
                self.stack_count -= finished.eval.len();
                self.result_stack = finished.eval;
                self.state = VMState::Halt;
            }
        }
        handler.on_context_unloaded(self.contexts.len());
        Ok(())
    }

    fn op_appcall(&mut self, handler: &mut dyn SyscallHandler, tail: bool) -> VmResult<()> {
        let hash_bytes = self.read_operand(20)?;
        let static_hash = UInt160::from_bytes(&hash_bytes)
            .map_err(|e| VmError::BadScript(e.to_string()))?;
        let hash = if static_hash.is_zero() {
            // Dynamic invocation: target hash comes from the stack.
            let bytes = self.pop_bytes()?;
            UInt160::from_bytes(&bytes).map_err(|e| VmError::BadScript(e.to_string()))?
        } else {
            static_hash
        };

        let call_depth = if tail {
            self.contexts.len()
        } else {
            self.contexts.len() + 1
        };
        let script = handler.contract_script(&hash, call_depth)?;
        if self.contexts.len() >= self.limits.max_invocation_depth {
            return Err(VmError::TooManyContexts);
        }

        let caller = self.current_context_mut()?;
        let eval = std::mem::take(&mut caller.eval);
        let mut callee = ExecutionContext::new(script);
        callee.eval = eval;
        if tail {
            let dropped = self.contexts.pop().ok_or(VmError::StackUnderflow)?;
            self.stack_count -= dropped.alt.len();
        }
        self.contexts.push(callee);
        Ok(())
    }

    // ---- signature opcodes -----------------------------------------------

    fn checked_hash(&self) -> VmResult<[u8; 32]> {
        self.checked_hash.ok_or(VmError::NoCheckedHash)
    }

    fn op_checksig(&mut self) -> VmResult<()> {
        let key_bytes = self.pop_bytes()?;
        let sig_bytes = self.pop_bytes()?;
        let digest = self.checked_hash()?;
        let valid = verify_signature(&digest, &key_bytes, &sig_bytes);
        self.push(StackItem::Boolean(valid))
    }

    fn op_verify(&mut self) -> VmResult<()> {
        let key_bytes = self.pop_bytes()?;
        let sig_bytes = self.pop_bytes()?;
        let message = self.pop_bytes()?;
        let digest = neo2_crypto::double_sha256(&message);
        let valid = verify_signature(&digest, &key_bytes, &sig_bytes);
        self.push(StackItem::Boolean(valid))
    }

    fn op_checkmultisig(&mut self) -> VmResult<()> {
        let keys = self.pop_byte_vector()?;
        if keys.is_empty() {
            return Err(VmError::StackUnderflow);
        }
        // Per-key verification cost beyond the first, charged once n is known.
        self.add_gas(100 * (keys.len() as i64 - 1))?;
        let sigs = self.pop_byte_vector()?;
        let digest = self.checked_hash()?;

        let valid = if sigs.is_empty() || sigs.len() > keys.len() {
            false
        } else {
            // Signatures must follow key order; each key is tried at most once.
            let mut key_index = 0;
            let mut matched = 0;
            for sig in &sigs {
                while key_index < keys.len() {
                    if verify_signature(&digest, &keys[key_index], sig) {
                        matched += 1;
                        key_index += 1;
                        break;
                    }
                    key_index += 1;
                }
                if keys.len() - key_index < sigs.len() - matched {
                    break;
                }
            }
            matched == sigs.len()
        };
        self.push(StackItem::Boolean(valid))
    }

    /// Pops either an array of byte strings or a count followed by that many
    /// byte strings; both forms are accepted by `CHECKMULTISIG`.
    fn pop_byte_vector(&mut self) -> VmResult<Vec<Vec<u8>>> {
        let top = self.pop()?;
        match top {
            StackItem::Array(h) | StackItem::Struct(h) => {
                let items = self.arena.list(h)?.clone();
                items.iter().map(|i| self.arena.to_bytes(i)).collect()
            }
            other => {
                let count = self.arena.to_i64(&other)?;
                if count < 0 || count as usize > self.limits.max_array_size {
                    return Err(VmError::CollectionTooLarge);
                }
                let mut out = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    out.push(self.pop_bytes()?);
                }
                Ok(out)
            }
        }
    }

    // ---- container helpers -----------------------------------------------

    fn op_newcollection(&mut self, as_struct: bool) -> VmResult<()> {
        let top = self.pop()?;
        let handle = match top {
            StackItem::Array(h) | StackItem::Struct(h) => {
                // Conversion between array and struct reuses the elements.
                let items = self.arena.list(h)?.clone();
                self.arena.alloc_list(items)
            }
            other => {
                let count = self.arena.to_i64(&other)?;
                if count < 0 || count as usize > self.limits.max_array_size {
                    return Err(VmError::CollectionTooLarge);
                }
                self.arena
                    .alloc_list(vec![StackItem::Boolean(false); count as usize])
            }
        };
        let item = if as_struct {
            StackItem::Struct(handle)
        } else {
            StackItem::Array(handle)
        };
        self.push(item)
    }

    fn op_pickitem(&mut self) -> VmResult<()> {
        let key = self.pop()?;
        let target = self.pop()?;
        let value = match target {
            StackItem::Array(h) | StackItem::Struct(h) => {
                let index = self.arena.to_i64(&key)?;
                let items = self.arena.list(h)?;
                if index < 0 || index as usize >= items.len() {
                    return Err(VmError::IndexOutOfBounds {
                        index,
                        len: items.len(),
                    });
                }
                items[index as usize].clone()
            }
            StackItem::Map(h) => self
                .arena
                .map_get(h, &key)?
                .ok_or(VmError::TypeMismatch { expected: "present key" })?,
            _ => return Err(VmError::TypeMismatch { expected: "collection" }),
        };
        self.push(value)
    }

    fn op_setitem(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let key = self.pop()?;
        let target = self.pop()?;
        let value = match value {
            StackItem::Struct(_) => self.arena.deep_copy(&value)?,
            other => other,
        };
        match target {
            StackItem::Array(h) | StackItem::Struct(h) => {
                let index = self.arena.to_i64(&key)?;
                let len = self.arena.list(h)?.len();
                if index < 0 || index as usize >= len {
                    return Err(VmError::IndexOutOfBounds { index, len });
                }
                self.arena.list_mut(h)?[index as usize] = value;
            }
            StackItem::Map(h) => {
                let pairs = self.arena.map(h)?;
                let inserting = self.arena.map_get(h, &key)?.is_none();
                if inserting && pairs.len() >= self.limits.max_array_size {
                    return Err(VmError::CollectionTooLarge);
                }
                self.arena.map_set(h, key, value)?;
            }
            _ => return Err(VmError::TypeMismatch { expected: "collection" }),
        }
        Ok(())
    }

    // ---- stack helpers ---------------------------------------------------

    fn remove_at(&mut self, depth: i64) -> VmResult<()> {
        if depth < 0 {
            return Err(VmError::IndexOutOfBounds { index: depth, len: 0 });
        }
        self.take_at(depth as usize)?;
        self.stack_count -= 1;
        Ok(())
    }

    fn take_at(&mut self, depth: usize) -> VmResult<StackItem> {
        let context = self.current_context_mut()?;
        let len = context.eval.len();
        if depth >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(context.eval.remove(len - 1 - depth))
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a 64-byte signature over a digest with an encoded public key.
/// Malformed keys or signatures simply fail verification.
fn verify_signature(digest: &[u8; 32], key_bytes: &[u8], sig_bytes: &[u8]) -> bool {
    let Ok(key) = neo2_crypto::PublicKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(sig) = neo2_crypto::Signature::from_slice(sig_bytes) else {
        return false;
    };
    key.verify_hash(digest, &sig)
}
