//! Script construction helpers.

use crate::opcode::OpCode;
use crate::stack_item::int_to_bytes;
use num_bigint::BigInt;

/// Appends a raw opcode.
pub fn opcode(script: &mut Vec<u8>, op: OpCode) {
    script.push(op as u8);
}

/// Appends a push of the given byte string, choosing the shortest form.
pub fn bytes(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0..=75 => {
            script.push(data.len() as u8);
        }
        76..=255 => {
            script.push(OpCode::PushData1 as u8);
            script.push(data.len() as u8);
        }
        256..=65535 => {
            script.push(OpCode::PushData2 as u8);
            script.extend_from_slice(&(data.len() as u16).to_le_bytes());
        }
        _ => {
            script.push(OpCode::PushData4 as u8);
            script.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Appends a push of an integer, using the short forms for -1..=16.
pub fn int(script: &mut Vec<u8>, value: i64) {
    match value {
        -1 => script.push(OpCode::PushM1 as u8),
        0 => script.push(OpCode::Push0 as u8),
        1..=16 => script.push(0x50 + value as u8),
        _ => bytes(script, &int_to_bytes(&BigInt::from(value))),
    }
}

/// Appends a push of a boolean.
pub fn bool(script: &mut Vec<u8>, value: bool) {
    if value {
        script.push(OpCode::Push1 as u8);
    } else {
        script.push(OpCode::Push0 as u8);
    }
}

/// Appends a `SYSCALL` with the given name.
pub fn syscall(script: &mut Vec<u8>, name: &str) {
    script.push(OpCode::Syscall as u8);
    script.push(name.len() as u8);
    script.extend_from_slice(name.as_bytes());
}

/// Appends an `APPCALL` of the given contract hash.
pub fn appcall(script: &mut Vec<u8>, hash: &neo2_core::UInt160) {
    script.push(OpCode::AppCall as u8);
    script.extend_from_slice(hash.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ints_use_short_opcodes() {
        let mut s = Vec::new();
        int(&mut s, 0);
        int(&mut s, 16);
        int(&mut s, -1);
        assert_eq!(s, vec![0x00, 0x60, 0x4f]);
    }

    #[test]
    fn larger_ints_push_bytes() {
        let mut s = Vec::new();
        int(&mut s, 17);
        assert_eq!(s, vec![0x01, 0x11]);
    }

    #[test]
    fn long_data_uses_pushdata() {
        let mut s = Vec::new();
        bytes(&mut s, &[0xaa; 80]);
        assert_eq!(s[0], OpCode::PushData1 as u8);
        assert_eq!(s[1], 80);
        assert_eq!(s.len(), 82);
    }

    #[test]
    fn syscall_encoding() {
        let mut s = Vec::new();
        syscall(&mut s, "Neo.Runtime.Log");
        assert_eq!(s[0], 0x68);
        assert_eq!(s[1] as usize, "Neo.Runtime.Log".len());
        assert_eq!(&s[2..], b"Neo.Runtime.Log");
    }
}
