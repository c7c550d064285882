//! Chain dump and restore: the `db dump`/`db restore` backing format.
//!
//! Layout: `[u32 start, present only when nonzero][u32 count]` then, per
//! block, `[u32 size][size bytes of the serialized block]`. All integers
//! little-endian.

use crate::blockchain::Blockchainer;
use crate::{LedgerError, LedgerResult};
use neo2_core::Block;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::info;

/// Writes `count` serialized blocks starting at `start`.
///
/// A nonzero `start` is written ahead of the count so a diff dump can be
/// applied on top of an existing chain.
pub fn dump<C: Blockchainer, W: Write>(
    chain: &C,
    start: u32,
    count: u32,
    out: &mut W,
) -> LedgerResult<()> {
    let io_err = |e: std::io::Error| LedgerError::validation(format!("dump write: {e}"));
    if start != 0 {
        out.write_all(&start.to_le_bytes()).map_err(io_err)?;
    }
    out.write_all(&count.to_le_bytes()).map_err(io_err)?;

    for index in start..start + count {
        let hash = chain
            .header_hash(index)
            .ok_or_else(|| LedgerError::validation(format!("no block at height {index}")))?;
        let block = chain
            .get_block(&hash)?
            .ok_or_else(|| LedgerError::validation(format!("missing block {hash}")))?;
        let bytes = neo2_io::to_bytes(&block);
        out.write_all(&(bytes.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        out.write_all(&bytes).map_err(io_err)?;
    }
    info!(start, count, "chain dump written");
    Ok(())
}

/// Restores blocks from a dump, skipping anything at or below the current
/// height. `diff` indicates a leading start index is present.
pub fn restore<C: Blockchainer, R: Read>(chain: &C, diff: bool, input: &mut R) -> LedgerResult<u32> {
    let io_err = |e: std::io::Error| LedgerError::validation(format!("dump read: {e}"));
    let mut u32_buf = [0u8; 4];

    let start = if diff {
        input.read_exact(&mut u32_buf).map_err(io_err)?;
        u32::from_le_bytes(u32_buf)
    } else {
        0
    };
    input.read_exact(&mut u32_buf).map_err(io_err)?;
    let count = u32::from_le_bytes(u32_buf);

    let mut applied = 0;
    for index in start..start + count {
        input.read_exact(&mut u32_buf).map_err(io_err)?;
        let size = u32::from_le_bytes(u32_buf) as usize;
        let mut bytes = vec![0u8; size];
        input.read_exact(&mut bytes).map_err(io_err)?;

        let block: Block = neo2_io::from_bytes(&bytes)?;
        if block.index() != index {
            return Err(LedgerError::validation(format!(
                "dump block at position {index} has index {}",
                block.index()
            )));
        }
        if block.index() <= chain.block_height() {
            continue;
        }
        chain.add_block(block)?;
        applied += 1;
    }
    info!(start, count, applied, "chain dump restored");
    Ok(applied)
}

/// JSON form of one storage write, for the per-1000-block batch dumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageOpJson {
    /// Hex-encoded key.
    pub key: String,
    /// Hex-encoded value; absent for deletions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One batch of storage changes covering a block range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageBatchJson {
    /// First block of the range.
    pub index: u32,
    pub changes: Vec<StorageOpJson>,
}

impl StorageBatchJson {
    /// Builds a batch from raw pending entries.
    pub fn from_entries(index: u32, entries: &[(Vec<u8>, Option<Vec<u8>>)]) -> Self {
        StorageBatchJson {
            index,
            changes: entries
                .iter()
                .map(|(key, value)| StorageOpJson {
                    key: hex::encode(key),
                    value: value.as_ref().map(hex::encode),
                })
                .collect(),
        }
    }

    /// Serializes the batch as JSON.
    pub fn to_json(&self) -> LedgerResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LedgerError::validation(format!("storage batch: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_batch_json_round_trip() {
        let batch = StorageBatchJson::from_entries(
            1000,
            &[
                (vec![0x70, 0x01], Some(vec![0xaa])),
                (vec![0x70, 0x02], None),
            ],
        );
        let json = batch.to_json().unwrap();
        let parsed: StorageBatchJson = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.index, 1000);
        assert_eq!(parsed.changes.len(), 2);
        assert_eq!(parsed.changes[0].value.as_deref(), Some("aa"));
        assert!(parsed.changes[1].value.is_none());
    }
}
