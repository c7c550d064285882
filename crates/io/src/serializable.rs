//! The wire-format trait every chain structure implements.

use crate::{BinaryWriter, MemoryReader, Result};

/// Types with a canonical binary encoding.
///
/// `deserialize` is a consuming parser returning `Result`; decode failures
/// are first-class errors, never a side channel on the reader.
pub trait Serializable: Sized {
    /// Writes the canonical encoding of `self`.
    fn serialize(&self, writer: &mut BinaryWriter);

    /// Parses a value from the reader.
    fn deserialize(reader: &mut MemoryReader) -> Result<Self>;

    /// Serialized length in bytes.
    fn size(&self) -> usize {
        let mut writer = BinaryWriter::new();
        self.serialize(&mut writer);
        writer.len()
    }
}
