//! Fixed gas prices per opcode.
//!
//! Prices are charged on dispatch, before the opcode runs. Syscall prices
//! come from the handler, keyed by name.

use crate::opcode::OpCode;

/// Price of one opcode in gas units.
pub fn opcode_price(op: OpCode, raw: u8) -> i64 {
    use OpCode::*;
    // Raw byte distinguishes the PUSHBYTESn family, all priced as pushes.
    let _ = raw;
    match op {
        Sha1 | Sha256 => 10,
        Hash160 | Hash256 => 20,
        CheckSig | Verify => 100,
        // Per-key cost is added during dispatch once n is known.
        CheckMultiSig => 100,
        AppCall | TailCall => 10,
        Syscall => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_costs_dominate() {
        assert!(opcode_price(OpCode::CheckSig, 0xac) > opcode_price(OpCode::Add, 0x93));
        assert_eq!(opcode_price(OpCode::Push1, 0x51), 1);
    }
}
