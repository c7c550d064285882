//! Execution results and notification events persisted per invocation.

use neo2_core::{Fixed8, UInt160, UInt256};
use neo2_io::{BinaryWriter, Error as IoError, MemoryReader, Serializable};
use neo2_vm::VMState;

const MAX_STACK_RESULTS: usize = 2048;
const MAX_EVENTS: usize = 65535;
const MAX_ITEM_BYTES: usize = 1024 * 1024;

/// Why a script ran: witness verification or block application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerType {
    Verification = 0x00,
    Application = 0x10,
}

impl TriggerType {
    /// Parses a trigger byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Verification),
            0x10 => Some(Self::Application),
            _ => None,
        }
    }
}

/// One `Runtime.Notify` emission: the notifying contract and the serialized
/// stack item it raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub script_hash: UInt160,
    pub item: Vec<u8>,
}

impl Serializable for NotificationEvent {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.script_hash);
        writer.write_var_bytes(&self.item);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(NotificationEvent {
            script_hash: reader.read_serializable()?,
            item: reader.read_var_bytes(MAX_ITEM_BYTES)?,
        })
    }
}

/// The outcome of one applied invocation, keyed by transaction hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppExecResult {
    pub tx_hash: UInt256,
    pub trigger: TriggerType,
    pub vm_state: VMState,
    pub gas_consumed: Fixed8,
    /// Result stack, one serialized item per entry (bottom first).
    pub stack: Vec<Vec<u8>>,
    pub events: Vec<NotificationEvent>,
}

impl Serializable for AppExecResult {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.tx_hash);
        writer.write_u8(self.trigger as u8);
        writer.write_u8(match self.vm_state {
            VMState::Halt => 1,
            VMState::Fault => 2,
            VMState::Break => 3,
            VMState::None => 0,
        });
        writer.write_serializable(&self.gas_consumed);
        writer.write_var_uint(self.stack.len() as u64);
        for item in &self.stack {
            writer.write_var_bytes(item);
        }
        writer.write_var_uint(self.events.len() as u64);
        for event in &self.events {
            writer.write_serializable(event);
        }
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let tx_hash = reader.read_serializable()?;
        let trigger_byte = reader.read_u8()?;
        let trigger = TriggerType::from_byte(trigger_byte)
            .ok_or_else(|| IoError::decoding("exec result", format!("trigger {trigger_byte:#04x}")))?;
        let vm_state = match reader.read_u8()? {
            1 => VMState::Halt,
            2 => VMState::Fault,
            3 => VMState::Break,
            _ => VMState::None,
        };
        let gas_consumed = reader.read_serializable()?;
        let stack_len = reader.read_var_uint(MAX_STACK_RESULTS as u64)? as usize;
        let mut stack = Vec::with_capacity(stack_len);
        for _ in 0..stack_len {
            stack.push(reader.read_var_bytes(MAX_ITEM_BYTES)?);
        }
        let event_count = reader.read_var_uint(MAX_EVENTS as u64)? as usize;
        let mut events = Vec::with_capacity(event_count);
        for _ in 0..event_count {
            events.push(reader.read_serializable()?);
        }
        Ok(AppExecResult {
            tx_hash,
            trigger,
            vm_state,
            gas_consumed,
            stack,
            events,
        })
    }
}
