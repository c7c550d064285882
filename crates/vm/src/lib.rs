//! Deterministic stack virtual machine.
//!
//! The VM interprets contract bytecode over a tagged [`StackItem`] model.
//! Container items live in an arena owned by the engine and are addressed by
//! 32-bit handles; identity equality compares handles, value equality walks
//! the arena with cycle detection. The machine never observes wall-clock
//! time or any other ambient state; all host access goes through the
//! [`SyscallHandler`] seam.

pub mod contract;
pub mod context;
pub mod emit;
pub mod engine;
pub mod error;
pub mod gas;
pub mod interop;
pub mod opcode;
pub mod serialization;
pub mod stack_item;

pub use context::ExecutionContext;
pub use engine::ExecutionEngine;
pub use error::{VmError, VmResult};
pub use interop::{InteropHandle, NoSyscalls, SyscallHandler};
pub use opcode::OpCode;
pub use stack_item::{ItemArena, ItemHandle, StackItem};

/// Terminal and intermediate machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMState {
    /// Still executing.
    None,
    /// Finished normally; results are on the result stack.
    Halt,
    /// Any error: bad opcode, type mismatch, limit breach, gas exhaustion.
    Fault,
    /// Stopped at a breakpoint (debugging only; never used by consensus).
    Break,
}

impl std::fmt::Display for VMState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VMState::None => "NONE",
            VMState::Halt => "HALT",
            VMState::Fault => "FAULT",
            VMState::Break => "BREAK",
        };
        f.write_str(s)
    }
}

/// Hard limits enforced during execution; exceeding any is a fault.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    /// Combined eval+alt stack depth across all contexts.
    pub max_stack_size: usize,
    /// Maximum element count for arrays, structs and maps.
    pub max_array_size: usize,
    /// Maximum byte length of a single item.
    pub max_item_size: usize,
    /// Maximum invocation-stack depth.
    pub max_invocation_depth: usize,
    /// Maximum byte width of an integer item.
    pub max_integer_size: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            max_stack_size: 2048,
            max_array_size: 1024,
            max_item_size: 1024 * 1024,
            max_invocation_depth: 1024,
            max_integer_size: 32,
        }
    }
}
