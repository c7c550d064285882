//! Standard contract script recognition and construction.
//!
//! Two byte patterns gate the cheap witness paths: the 35-byte signature
//! contract and the m-of-n multi-signature contract. Any deviation from the
//! exact pattern disqualifies a script.

use crate::emit;
use crate::error::{VmError, VmResult};
use crate::opcode::OpCode;
use neo2_crypto::PublicKey;

const MAX_MULTISIG_KEYS: usize = 1024;

/// Whether the script is exactly `PUSHBYTES33 <key> CHECKSIG`.
pub fn is_signature_contract(script: &[u8]) -> bool {
    script.len() == 35 && script[0] == 0x21 && script[34] == OpCode::CheckSig as u8
}

/// Whether the script is a canonical m-of-n multi-signature contract.
pub fn is_multisig_contract(script: &[u8]) -> bool {
    parse_multisig_contract(script).is_some()
}

/// Parses a multi-signature contract, returning `(m, keys)`.
///
/// The pattern is `<push m> (PUSHBYTES33 <key>)^n <push n> CHECKMULTISIG`
/// with `1 <= m <= n <= 1024`; anything else returns `None`.
pub fn parse_multisig_contract(script: &[u8]) -> Option<(usize, Vec<Vec<u8>>)> {
    let mut pos = 0;
    let m = read_push_int(script, &mut pos)?;

    let mut keys = Vec::new();
    while pos < script.len() && script[pos] == 0x21 {
        if pos + 34 > script.len() {
            return None;
        }
        keys.push(script[pos + 1..pos + 34].to_vec());
        pos += 34;
    }

    let n = read_push_int(script, &mut pos)?;
    if pos + 1 != script.len() || script[pos] != OpCode::CheckMultiSig as u8 {
        return None;
    }
    if keys.len() != n || m < 1 || m > n || n > MAX_MULTISIG_KEYS {
        return None;
    }
    Some((m, keys))
}

/// Reads a small integer push: `PUSH1`..`PUSH16` or `PUSHBYTES1/2` of a
/// little-endian value.
fn read_push_int(script: &[u8], pos: &mut usize) -> Option<usize> {
    let b = *script.get(*pos)?;
    match b {
        0x51..=0x60 => {
            *pos += 1;
            Some((b - 0x50) as usize)
        }
        1 | 2 => {
            let len = b as usize;
            if *pos + 1 + len > script.len() {
                return None;
            }
            let mut value = 0usize;
            for (i, byte) in script[*pos + 1..*pos + 1 + len].iter().enumerate() {
                value |= (*byte as usize) << (8 * i);
            }
            *pos += 1 + len;
            Some(value)
        }
        _ => None,
    }
}

/// Builds the single-signature verification script for a key.
pub fn create_signature_redeem_script(key: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    emit::bytes(&mut script, &key.to_bytes());
    emit::opcode(&mut script, OpCode::CheckSig);
    script
}

/// Builds the m-of-n multi-signature verification script.
///
/// Keys are sorted canonically by their encoded bytes; signatures later must
/// follow the same order.
pub fn create_multisig_redeem_script(m: usize, keys: &[PublicKey]) -> VmResult<Vec<u8>> {
    if m < 1 {
        return Err(VmError::BadScript(format!("m must be positive, got {m}")));
    }
    if m > keys.len() {
        return Err(VmError::BadScript(format!(
            "m ({m}) exceeds key count ({})",
            keys.len()
        )));
    }
    if keys.len() > MAX_MULTISIG_KEYS {
        return Err(VmError::BadScript(format!(
            "key count {} exceeds maximum {MAX_MULTISIG_KEYS}",
            keys.len()
        )));
    }

    let mut sorted = keys.to_vec();
    sorted.sort();

    let mut script = Vec::new();
    emit::int(&mut script, m as i64);
    for key in &sorted {
        emit::bytes(&mut script, &key.to_bytes());
    }
    emit::int(&mut script, sorted.len() as i64);
    emit::opcode(&mut script, OpCode::CheckMultiSig);
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo2_crypto::KeyPair;

    #[test]
    fn signature_contract_detection() {
        let key = *KeyPair::generate().public_key();
        let script = create_signature_redeem_script(&key);
        assert_eq!(script.len(), 35);
        assert!(is_signature_contract(&script));
        assert!(!is_multisig_contract(&script));

        let mut bad = script.clone();
        bad.push(0x61); // trailing NOP invalidates the pattern
        assert!(!is_signature_contract(&bad));
    }

    #[test]
    fn multisig_contract_round_trip() {
        let keys: Vec<PublicKey> = (0..4).map(|_| *KeyPair::generate().public_key()).collect();
        let script = create_multisig_redeem_script(3, &keys).unwrap();
        assert!(is_multisig_contract(&script));
        assert!(!is_signature_contract(&script));

        let (m, parsed_keys) = parse_multisig_contract(&script).unwrap();
        assert_eq!(m, 3);
        assert_eq!(parsed_keys.len(), 4);
        // Parsed keys come back in canonical order.
        let mut sorted = keys.clone();
        sorted.sort();
        for (parsed, expected) in parsed_keys.iter().zip(sorted.iter()) {
            assert_eq!(parsed.as_slice(), expected.to_bytes().as_slice());
        }
    }

    #[test]
    fn multisig_rejects_bad_m() {
        let keys: Vec<PublicKey> = (0..2).map(|_| *KeyPair::generate().public_key()).collect();
        assert!(create_multisig_redeem_script(0, &keys).is_err());
        assert!(create_multisig_redeem_script(3, &keys).is_err());
    }

    #[test]
    fn extra_bytes_invalidate_multisig() {
        let keys: Vec<PublicKey> = (0..2).map(|_| *KeyPair::generate().public_key()).collect();
        let mut script = create_multisig_redeem_script(2, &keys).unwrap();
        script.insert(0, 0x61);
        assert!(!is_multisig_contract(&script));
    }
}
