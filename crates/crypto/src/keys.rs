//! Key pairs and ECDSA signatures.
//!
//! The chain signs over prehashed digests (double SHA-256 of the unsigned
//! body); both signing and verification therefore use the prehash entry
//! points rather than hashing again internally.

use crate::{Error, Result};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use std::cmp::Ordering;
use std::fmt;

/// A 64-byte `r ‖ s` ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// Parses a signature from a 64-byte slice.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; 64] = data.try_into().map_err(|_| Error::InvalidSignature)?;
        Ok(Signature(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// A secp256r1 public key in compressed SEC1 form.
///
/// Ordering compares the 33-byte encoding, which is the canonical sort used
/// for multi-signature scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    encoded: [u8; 33],
}

impl PublicKey {
    /// Parses a compressed (33-byte) or uncompressed (65-byte) SEC1 key.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let key = VerifyingKey::from_sec1_bytes(data).map_err(|_| Error::InvalidPublicKey)?;
        let point = key.to_encoded_point(true);
        let encoded: [u8; 33] = point
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidPublicKey)?;
        Ok(PublicKey { encoded })
    }

    /// The compressed SEC1 encoding.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.encoded
    }

    /// Verifies a signature over an already-hashed digest.
    pub fn verify_hash(&self, digest: &[u8; 32], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(&self.encoded) else {
            return false;
        };
        let Ok(sig) = P256Signature::from_slice(signature.as_bytes()) else {
            return false;
        };
        key.verify_prehash(digest, &sig).is_ok()
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.encoded))
    }
}

/// A secp256r1 private/public key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let public = Self::public_of(&signing);
        KeyPair { signing, public }
    }

    /// Builds a key pair from a 32-byte private scalar.
    pub fn from_private_bytes(data: &[u8]) -> Result<Self> {
        let signing = SigningKey::from_slice(data).map_err(|_| Error::InvalidPrivateKey)?;
        let public = Self::public_of(&signing);
        Ok(KeyPair { signing, public })
    }

    fn public_of(signing: &SigningKey) -> PublicKey {
        let point = signing.verifying_key().to_encoded_point(true);
        let mut encoded = [0u8; 33];
        encoded.copy_from_slice(point.as_bytes());
        PublicKey { encoded }
    }

    /// The public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The raw private scalar.
    pub fn private_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes().into()
    }

    /// Signs an already-hashed digest, returning `r ‖ s`.
    pub fn sign_hash(&self, digest: &[u8; 32]) -> Result<Signature> {
        let sig: P256Signature = self
            .signing
            .sign_prehash(digest)
            .map_err(|_| Error::InvalidPrivateKey)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(&sig.to_bytes());
        Ok(Signature(out))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Recovers a secp256r1 public key from a signature over a digest.
///
/// `recovery_id` is the low-bit parity selector (0..=3).
pub fn secp256r1_recover(
    digest: &[u8; 32],
    signature: &Signature,
    recovery_id: u8,
) -> Result<PublicKey> {
    let sig = P256Signature::from_slice(signature.as_bytes()).map_err(|_| Error::InvalidSignature)?;
    let rec_id = ecdsa::RecoveryId::from_byte(recovery_id).ok_or(Error::RecoveryFailed)?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, rec_id)
        .map_err(|_| Error::RecoveryFailed)?;
    let point = key.to_encoded_point(true);
    let encoded: [u8; 33] = point
        .as_bytes()
        .try_into()
        .map_err(|_| Error::RecoveryFailed)?;
    Ok(PublicKey { encoded })
}

/// Recovers a secp256k1 public key (compressed, 33 bytes) from a signature
/// over a digest.
pub fn secp256k1_recover(
    digest: &[u8; 32],
    signature: &Signature,
    recovery_id: u8,
) -> Result<[u8; 33]> {
    use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
    use secp256k1::{Message, Secp256k1};

    let rec_id = RecoveryId::from_i32(i32::from(recovery_id)).map_err(|_| Error::RecoveryFailed)?;
    let sig = RecoverableSignature::from_compact(signature.as_bytes(), rec_id)
        .map_err(|_| Error::InvalidSignature)?;
    let message = Message::from_digest(*digest);
    let secp = Secp256k1::verification_only();
    let key = secp
        .recover_ecdsa(&message, &sig)
        .map_err(|_| Error::RecoveryFailed)?;
    Ok(key.serialize())
}
