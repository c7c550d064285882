//! Execution contexts: one frame of the invocation stack.

use crate::stack_item::StackItem;
use neo2_core::UInt160;

/// One loaded script with its instruction pointer and stacks.
#[derive(Debug)]
pub struct ExecutionContext {
    script: Vec<u8>,
    script_hash: UInt160,
    /// Next instruction offset.
    pub ip: usize,
    /// Main evaluation stack; index 0 is the bottom.
    pub eval: Vec<StackItem>,
    /// Secondary (alt) stack.
    pub alt: Vec<StackItem>,
    /// Slots reserved at load time for statics; unused by the legacy
    /// opcode set but part of the context state.
    pub static_slot_count: usize,
}

impl ExecutionContext {
    /// Loads a script as a fresh context.
    pub fn new(script: Vec<u8>) -> Self {
        let script_hash = UInt160::from_script(&script);
        ExecutionContext {
            script,
            script_hash,
            ip: 0,
            eval: Vec::new(),
            alt: Vec::new(),
            static_slot_count: 0,
        }
    }

    /// The raw script bytes.
    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// Hash identifying the running script.
    pub fn script_hash(&self) -> UInt160 {
        self.script_hash
    }

    /// Whether the instruction pointer has run off the script end.
    pub fn at_end(&self) -> bool {
        self.ip >= self.script.len()
    }
}
