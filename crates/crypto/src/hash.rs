//! Chain hash functions.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 of the input.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 applied twice; the transaction/block hash function.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Alias for [`double_sha256`] under its interop name.
pub fn hash256(data: &[u8]) -> [u8; 32] {
    double_sha256(data)
}

/// RIPEMD-160 of the input.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

/// RIPEMD-160 over SHA-256; the script-hash function.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// First four bytes of the double SHA-256, used by base58check.
pub fn checksum(data: &[u8]) -> [u8; 4] {
    let h = double_sha256(data);
    [h[0], h[1], h[2], h[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_empty_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn double_sha256_hello() {
        // double-SHA-256("hello")
        assert_eq!(
            hex::encode(double_sha256(b"hello")),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn hash160_is_ripemd_of_sha() {
        let inner = sha256(b"abc");
        assert_eq!(hash160(b"abc"), ripemd160(&inner));
    }

    #[test]
    fn checksum_prefix() {
        let full = double_sha256(b"payload");
        assert_eq!(checksum(b"payload"), [full[0], full[1], full[2], full[3]]);
    }
}
