//! Storage: the opaque KV interface and the typed DAO over it.
//!
//! The on-disk engine is an external collaborator; the core only requires
//! [`Store`]: point reads, prefix scans and an atomic batch write. The DAO
//! adds typed accessors and a stack of write-set layers giving
//! snapshot-then-commit semantics for nested contract calls.

pub mod dao;
pub mod keys;
pub mod store;

pub use dao::{CachedDao, DaoRead, DaoWrite, SimpleDao, StorageFindCursor};
pub use keys::Prefix;
pub use store::{Batch, BatchOp, MemoryStore, Store};

/// Errors from the storage layer.
///
/// `NotFound` is a distinct non-fatal condition; `Io` aborts the current
/// batch and surfaces to the operator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("store failure: {0}")]
    Io(String),

    #[error("malformed stored record: {0}")]
    Corrupt(String),
}

impl From<neo2_io::Error> for StorageError {
    fn from(err: neo2_io::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
