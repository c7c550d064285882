//! Delegated-BFT consensus.
//!
//! `n` validators tolerate `f = (n-1)/3` faults; every phase transition
//! requires `m = n - f` matching messages. The [`ConsensusService`] is a
//! deterministic state machine: all timing enters through explicit
//! timestamps, all networking through payload in/out queues.

pub mod context;
pub mod message;
pub mod payload;
pub mod service;

pub use context::ConsensusContext;
pub use message::{
    ChangeView, Commit, ConsensusMessage, MessageType, PrepareRequest, PrepareResponse,
    RecoveryMessage, RecoveryRequest,
};
pub use payload::ConsensusPayload;
pub use service::{ConsensusConfig, ConsensusService};

/// Maximum faulty validators for a committee of `n`.
pub fn fault_tolerance(n: usize) -> usize {
    (n - 1) / 3
}

/// Messages required to certify a phase: `n - f`.
pub fn quorum(n: usize) -> usize {
    n - fault_tolerance(n)
}

/// Errors from the consensus subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Io(#[from] neo2_io::Error),

    #[error(transparent)]
    Ledger(#[from] neo2_ledger::LedgerError),

    #[error(transparent)]
    Core(#[from] neo2_core::Error),

    #[error("payload rejected: {0}")]
    InvalidPayload(String),

    #[error("not a validator for this round")]
    NotValidator,
}

impl ConsensusError {
    /// Builds an `InvalidPayload` error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        ConsensusError::InvalidPayload(reason.into())
    }
}

/// Result alias for consensus operations.
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_math() {
        assert_eq!(fault_tolerance(4), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(fault_tolerance(7), 2);
        assert_eq!(quorum(7), 5);
        assert_eq!(quorum(1), 1);
    }
}
