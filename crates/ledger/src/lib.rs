//! The blockchain engine and its host-side services.
//!
//! [`Blockchain`] validates and applies blocks over the DAO, drives the VM
//! for invocation transactions through the interop layer, commits storage
//! changes to the state trie, and feeds events outward. The [`Mempool`]
//! holds unconfirmed transactions and the [`BlockQueue`] reorders inbound
//! blocks into height order.

pub mod block_queue;
pub mod blockchain;
pub mod chaindump;
pub mod genesis;
pub mod interop;
pub mod mempool;
pub mod results;

pub use block_queue::BlockQueue;
pub use blockchain::{BlockEvent, Blockchain, Blockchainer};
pub use mempool::{Feer, Mempool};
pub use results::{AppExecResult, NotificationEvent, TriggerType};

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] neo2_storage::StorageError),

    #[error(transparent)]
    Core(#[from] neo2_core::Error),

    #[error(transparent)]
    Mpt(#[from] neo2_mpt::MptError),

    #[error(transparent)]
    Io(#[from] neo2_io::Error),

    #[error("vm fault: {0}")]
    Vm(#[from] neo2_vm::VmError),
}

impl LedgerError {
    /// Builds a `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        LedgerError::Validation(reason.into())
    }
}

/// Result alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
