//! Unspent/spent coin tracking for the UTXO ledger.

use crate::transaction::Output;
use crate::UInt256;
use bitflags::bitflags;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};

const MAX_OUTPUTS: usize = 65535;

bitflags! {
    /// Per-output lifecycle flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CoinState: u8 {
        const CONFIRMED = 0x00;
        const SPENT = 0x02;
        const CLAIMED = 0x04;
        const FROZEN = 0x20;
    }
}

/// One output of a stored transaction together with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    pub output: Output,
    /// Height at which the output was spent; zero while unspent.
    pub spend_height: u32,
    pub state: CoinState,
}

impl OutputState {
    /// A freshly confirmed, unspent output.
    pub fn new(output: Output) -> Self {
        OutputState {
            output,
            spend_height: 0,
            state: CoinState::CONFIRMED,
        }
    }

    /// Whether the output has been spent.
    pub fn is_spent(&self) -> bool {
        self.state.contains(CoinState::SPENT)
    }

    /// Marks the output spent at the given height.
    pub fn spend(&mut self, height: u32) {
        self.state |= CoinState::SPENT;
        self.spend_height = height;
    }
}

impl Serializable for OutputState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.output);
        writer.write_u32(self.spend_height);
        writer.write_u8(self.state.bits());
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(OutputState {
            output: reader.read_serializable()?,
            spend_height: reader.read_u32()?,
            state: CoinState::from_bits_retain(reader.read_u8()?),
        })
    }
}

/// Lifecycle state of every output of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentCoinState {
    /// Height of the block that confirmed the transaction.
    pub height: u32,
    pub states: Vec<OutputState>,
}

impl UnspentCoinState {
    /// Builds the state for a newly confirmed transaction.
    pub fn new(height: u32, outputs: &[Output]) -> Self {
        UnspentCoinState {
            height,
            states: outputs.iter().cloned().map(OutputState::new).collect(),
        }
    }

    /// Whether every output is spent.
    pub fn fully_spent(&self) -> bool {
        self.states.iter().all(OutputState::is_spent)
    }
}

impl Serializable for UnspentCoinState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.height);
        writer.write_serializable_list(&self.states);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(UnspentCoinState {
            height: reader.read_u32()?,
            states: reader.read_serializable_list(MAX_OUTPUTS)?,
        })
    }
}

/// Claim bookkeeping: spend heights of governing-token outputs, consumed by
/// claim transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpentCoinState {
    /// Height of the block that confirmed the source transaction.
    pub height: u32,
    /// `output index -> spend height` for spent but unclaimed outputs.
    pub items: Vec<(u16, u32)>,
}

impl SpentCoinState {
    /// Records a spend of the given output index.
    pub fn record(&mut self, index: u16, spend_height: u32) {
        if !self.items.iter().any(|(i, _)| *i == index) {
            self.items.push((index, spend_height));
        }
    }

    /// Removes a claimed output, returning its spend height.
    pub fn claim(&mut self, index: u16) -> Option<u32> {
        let pos = self.items.iter().position(|(i, _)| *i == index)?;
        Some(self.items.remove(pos).1)
    }
}

impl Serializable for SpentCoinState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.height);
        writer.write_var_uint(self.items.len() as u64);
        for (index, height) in &self.items {
            writer.write_u16(*index);
            writer.write_u32(*height);
        }
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let height = reader.read_u32()?;
        let count = reader.read_var_uint(MAX_OUTPUTS as u64)? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push((reader.read_u16()?, reader.read_u32()?));
        }
        Ok(SpentCoinState { height, items })
    }
}

/// Key of a spendable coin.
pub type CoinReference = (UInt256, u16);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fixed8, UInt160};

    fn outputs() -> Vec<Output> {
        vec![
            Output::new(UInt256::hash(b"neo"), Fixed8::from_int(100), UInt160([1; 20])),
            Output::new(UInt256::hash(b"gas"), Fixed8::from_int(5), UInt160([2; 20])),
        ]
    }

    #[test]
    fn fresh_coins_are_unspent() {
        let unspent = UnspentCoinState::new(10, &outputs());
        assert!(!unspent.fully_spent());
        assert!(unspent.states.iter().all(|s| !s.is_spent()));
    }

    #[test]
    fn spending_sets_flag_and_height() {
        let mut unspent = UnspentCoinState::new(10, &outputs());
        unspent.states[0].spend(42);
        assert!(unspent.states[0].is_spent());
        assert_eq!(unspent.states[0].spend_height, 42);
        assert!(unspent.states[0].state.contains(CoinState::SPENT));
        assert!(!unspent.fully_spent());
        unspent.states[1].spend(43);
        assert!(unspent.fully_spent());
    }

    #[test]
    fn round_trip() {
        let mut unspent = UnspentCoinState::new(7, &outputs());
        unspent.states[1].spend(9);
        let bytes = neo2_io::to_bytes(&unspent);
        assert_eq!(
            neo2_io::from_bytes::<UnspentCoinState>(&bytes).unwrap(),
            unspent
        );
    }

    #[test]
    fn spent_coin_claim_removes_entry() {
        let mut spent = SpentCoinState {
            height: 5,
            items: vec![],
        };
        spent.record(0, 20);
        spent.record(0, 21); // duplicate index ignored
        assert_eq!(spent.items.len(), 1);
        assert_eq!(spent.claim(0), Some(20));
        assert_eq!(spent.claim(0), None);
    }
}
