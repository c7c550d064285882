//! Core chain data model for the neo2 node.
//!
//! Scalars ([`UInt160`], [`UInt256`], [`Fixed8`]), witnesses, transactions,
//! blocks, the header-hash list and the persistent state records the DAO
//! stores. All wire encodings are little-endian; hashes display big-endian.

pub mod block;
pub mod fixed8;
pub mod header_hash_list;
pub mod network_params;
pub mod state;
pub mod transaction;
pub mod uint160;
pub mod uint256;
pub mod witness;

pub use block::{Block, BlockBase, Header, TrimmedBlock};
pub use fixed8::Fixed8;
pub use header_hash_list::HeaderHashList;
pub use network_params::NetworkParams;
pub use transaction::{
    Attribute, AttributeUsage, Input, Output, Transaction, TransactionData, TransactionType,
};
pub use uint160::UInt160;
pub use uint256::UInt256;
pub use witness::Witness;

/// Maximum serialized transaction size accepted by verification.
pub const MAX_TRANSACTION_SIZE: usize = 100 * 1024;

/// Errors raised by the data model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] neo2_io::Error),

    #[error(transparent)]
    Crypto(#[from] neo2_crypto::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid {what}: {reason}")]
    Format { what: &'static str, reason: String },
}

impl Error {
    /// Builds a `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation(reason.into())
    }

    /// Builds a `Format` error for the named structure.
    pub fn format(what: &'static str, reason: impl Into<String>) -> Self {
        Error::Format {
            what,
            reason: reason.into(),
        }
    }
}

/// Result alias for data-model operations.
pub type Result<T> = std::result::Result<T, Error>;
