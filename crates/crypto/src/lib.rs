//! Cryptographic primitives for the neo2 node.
//!
//! Hash functions used by the chain (SHA-256, RIPEMD-160 and their
//! compositions), ECDSA over secp256r1 and secp256k1, and the transaction
//! Merkle tree.

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{checksum, double_sha256, hash160, hash256, ripemd160, sha256};
pub use keys::{KeyPair, PublicKey, Signature};
pub use merkle::MerkleTree;

/// Errors from key handling and signature checks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("merkle tree requires at least one leaf")]
    EmptyMerkleTree,
}

/// Result alias for crypto operations.
pub type Result<T> = std::result::Result<T, Error>;
