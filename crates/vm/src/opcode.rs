//! The one-byte opcode table.

use crate::error::{VmError, VmResult};

/// VM opcodes.
///
/// `PUSHBYTES1`..`PUSHBYTES75` are represented by their raw byte values and
/// handled as a range during dispatch; only the named boundary values appear
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Push0 = 0x00,
    PushBytes1 = 0x01,
    PushData1 = 0x4c,
    PushData2 = 0x4d,
    PushData4 = 0x4e,
    PushM1 = 0x4f,
    Push1 = 0x51,
    Push2 = 0x52,
    Push3 = 0x53,
    Push4 = 0x54,
    Push5 = 0x55,
    Push6 = 0x56,
    Push7 = 0x57,
    Push8 = 0x58,
    Push9 = 0x59,
    Push10 = 0x5a,
    Push11 = 0x5b,
    Push12 = 0x5c,
    Push13 = 0x5d,
    Push14 = 0x5e,
    Push15 = 0x5f,
    Push16 = 0x60,

    Nop = 0x61,
    Jmp = 0x62,
    JmpIf = 0x63,
    JmpIfNot = 0x64,
    Call = 0x65,
    Ret = 0x66,
    AppCall = 0x67,
    Syscall = 0x68,
    TailCall = 0x69,

    DupFromAltStack = 0x6a,
    ToAltStack = 0x6b,
    FromAltStack = 0x6c,
    XDrop = 0x6d,
    XSwap = 0x72,
    XTuck = 0x73,
    Depth = 0x74,
    Drop = 0x75,
    Dup = 0x76,
    Nip = 0x77,
    Over = 0x78,
    Pick = 0x79,
    Roll = 0x7a,
    Rot = 0x7b,
    Swap = 0x7c,
    Tuck = 0x7d,

    Cat = 0x7e,
    SubStr = 0x7f,
    Left = 0x80,
    Right = 0x81,
    Size = 0x82,

    Invert = 0x83,
    And = 0x84,
    Or = 0x85,
    Xor = 0x86,
    Equal = 0x87,

    Inc = 0x8b,
    Dec = 0x8c,
    Sign = 0x8d,
    Negate = 0x8f,
    Abs = 0x90,
    Not = 0x91,
    Nz = 0x92,
    Add = 0x93,
    Sub = 0x94,
    Mul = 0x95,
    Div = 0x96,
    Mod = 0x97,
    Shl = 0x98,
    Shr = 0x99,
    BoolAnd = 0x9a,
    BoolOr = 0x9b,
    NumEqual = 0x9c,
    NumNotEqual = 0x9e,
    Lt = 0x9f,
    Gt = 0xa0,
    Lte = 0xa1,
    Gte = 0xa2,
    Min = 0xa3,
    Max = 0xa4,
    Within = 0xa5,

    Sha1 = 0xa7,
    Sha256 = 0xa8,
    Hash160 = 0xa9,
    Hash256 = 0xaa,
    CheckSig = 0xac,
    Verify = 0xad,
    CheckMultiSig = 0xae,

    ArraySize = 0xc0,
    Pack = 0xc1,
    Unpack = 0xc2,
    PickItem = 0xc3,
    SetItem = 0xc4,
    NewArray = 0xc5,
    NewStruct = 0xc6,
    NewMap = 0xc7,
    Append = 0xc8,
    Reverse = 0xc9,
    Remove = 0xca,
    HasKey = 0xcb,
    Keys = 0xcc,
    Values = 0xcd,

    Throw = 0xf0,
    ThrowIfNot = 0xf1,
}

impl OpCode {
    /// Decodes an opcode byte. `PUSHBYTES2`..`PUSHBYTES74` decode to the
    /// `PushBytes1` marker; the dispatcher uses the raw byte for the length.
    pub fn from_byte(b: u8) -> VmResult<OpCode> {
        use OpCode::*;
        Ok(match b {
            0x00 => Push0,
            0x01..=0x4b => PushBytes1,
            0x4c => PushData1,
            0x4d => PushData2,
            0x4e => PushData4,
            0x4f => PushM1,
            0x51 => Push1,
            0x52 => Push2,
            0x53 => Push3,
            0x54 => Push4,
            0x55 => Push5,
            0x56 => Push6,
            0x57 => Push7,
            0x58 => Push8,
            0x59 => Push9,
            0x5a => Push10,
            0x5b => Push11,
            0x5c => Push12,
            0x5d => Push13,
            0x5e => Push14,
            0x5f => Push15,
            0x60 => Push16,
            0x61 => Nop,
            0x62 => Jmp,
            0x63 => JmpIf,
            0x64 => JmpIfNot,
            0x65 => Call,
            0x66 => Ret,
            0x67 => AppCall,
            0x68 => Syscall,
            0x69 => TailCall,
            0x6a => DupFromAltStack,
            0x6b => ToAltStack,
            0x6c => FromAltStack,
            0x6d => XDrop,
            0x72 => XSwap,
            0x73 => XTuck,
            0x74 => Depth,
            0x75 => Drop,
            0x76 => Dup,
            0x77 => Nip,
            0x78 => Over,
            0x79 => Pick,
            0x7a => Roll,
            0x7b => Rot,
            0x7c => Swap,
            0x7d => Tuck,
            0x7e => Cat,
            0x7f => SubStr,
            0x80 => Left,
            0x81 => Right,
            0x82 => Size,
            0x83 => Invert,
            0x84 => And,
            0x85 => Or,
            0x86 => Xor,
            0x87 => Equal,
            0x8b => Inc,
            0x8c => Dec,
            0x8d => Sign,
            0x8f => Negate,
            0x90 => Abs,
            0x91 => Not,
            0x92 => Nz,
            0x93 => Add,
            0x94 => Sub,
            0x95 => Mul,
            0x96 => Div,
            0x97 => Mod,
            0x98 => Shl,
            0x99 => Shr,
            0x9a => BoolAnd,
            0x9b => BoolOr,
            0x9c => NumEqual,
            0x9e => NumNotEqual,
            0x9f => Lt,
            0xa0 => Gt,
            0xa1 => Lte,
            0xa2 => Gte,
            0xa3 => Min,
            0xa4 => Max,
            0xa5 => Within,
            0xa7 => Sha1,
            0xa8 => Sha256,
            0xa9 => Hash160,
            0xaa => Hash256,
            0xac => CheckSig,
            0xad => Verify,
            0xae => CheckMultiSig,
            0xc0 => ArraySize,
            0xc1 => Pack,
            0xc2 => Unpack,
            0xc3 => PickItem,
            0xc4 => SetItem,
            0xc5 => NewArray,
            0xc6 => NewStruct,
            0xc7 => NewMap,
            0xc8 => Append,
            0xc9 => Reverse,
            0xca => Remove,
            0xcb => HasKey,
            0xcc => Keys,
            0xcd => Values,
            0xf0 => Throw,
            0xf1 => ThrowIfNot,
            other => return Err(VmError::UnknownOpcode(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_bytes_range_maps_to_marker() {
        for b in 0x01..=0x4bu8 {
            assert_eq!(OpCode::from_byte(b).unwrap(), OpCode::PushBytes1);
        }
    }

    #[test]
    fn unknown_bytes_rejected() {
        assert!(matches!(
            OpCode::from_byte(0x50),
            Err(VmError::UnknownOpcode(0x50))
        ));
        assert!(OpCode::from_byte(0xff).is_err());
    }

    #[test]
    fn named_opcodes_round_trip() {
        assert_eq!(OpCode::from_byte(0xac).unwrap(), OpCode::CheckSig);
        assert_eq!(OpCode::from_byte(0x66).unwrap(), OpCode::Ret);
        assert_eq!(OpCode::from_byte(0x68).unwrap(), OpCode::Syscall);
    }
}
