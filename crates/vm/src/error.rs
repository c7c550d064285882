//! VM error type. Every variant faults the machine; none panic.

/// Reasons an execution faults.
///
/// Contract bugs surface as `Fault` results, never as panics; the engine
/// converts any of these into the `FAULT` terminal state.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("unknown syscall {0}")]
    UnknownSyscall(String),

    #[error("invalid instruction pointer {0}")]
    InvalidInstructionPointer(usize),

    #[error("gas limit exceeded")]
    GasExhausted,

    #[error("stack size limit exceeded")]
    StackOverflow,

    #[error("item size limit exceeded")]
    ItemTooLarge,

    #[error("collection size limit exceeded")]
    CollectionTooLarge,

    #[error("integer width limit exceeded")]
    IntegerTooLarge,

    #[error("invocation stack limit exceeded")]
    TooManyContexts,

    #[error("recursive item cannot be serialized")]
    RecursiveReference,

    #[error("interop handle cannot be serialized")]
    UnserializableItem,

    #[error("map keys must be non-container primitives")]
    InvalidMapKey,

    #[error("division by zero")]
    DivisionByZero,

    #[error("THROW/THROWIFNOT raised")]
    Throw,

    #[error("execution cancelled")]
    Cancelled,

    #[error("no signable data bound to this execution")]
    NoCheckedHash,

    #[error("syscall failed: {0}")]
    Syscall(String),

    #[error("malformed script: {0}")]
    BadScript(String),
}

impl VmError {
    /// Builds a `Syscall` error from any displayable cause.
    pub fn syscall(reason: impl std::fmt::Display) -> Self {
        VmError::Syscall(reason.to_string())
    }
}

/// Result alias for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;
