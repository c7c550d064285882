//! The in-order list of accepted header hashes.

use crate::UInt256;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};

const MAX_HASHES: usize = 1 << 24;

/// Header hashes indexed by block height.
///
/// Not internally synchronized; the blockchain engine guards it with its
/// write lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderHashList {
    hashes: Vec<UInt256>,
}

impl HeaderHashList {
    /// Creates a list seeded with the given hashes.
    pub fn new(hashes: Vec<UInt256>) -> Self {
        HeaderHashList { hashes }
    }

    /// Parses a list from its serialized form (count-prefixed hashes).
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        Ok(neo2_io::from_bytes(data)?)
    }

    /// Appends a hash at the next height.
    pub fn add(&mut self, hash: UInt256) {
        self.hashes.push(hash);
    }

    /// Number of stored hashes.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Hash at the given height, if stored.
    pub fn get(&self, index: usize) -> Option<UInt256> {
        self.hashes.get(index).copied()
    }

    /// The most recently added hash.
    pub fn last(&self) -> Option<UInt256> {
        self.hashes.last().copied()
    }
}

impl Serializable for HeaderHashList {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable_list(&self.hashes);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(HeaderHashList {
            hashes: reader.read_serializable_list(MAX_HASHES)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_parses_what_serialize_wrote() {
        let mut list = HeaderHashList::default();
        list.add(UInt256::hash(b"genesis"));
        list.add(UInt256::hash(b"one"));
        let bytes = neo2_io::to_bytes(&list);
        let parsed = HeaderHashList::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, list);
        assert_eq!(parsed.get(1), Some(UInt256::hash(b"one")));
    }

    #[test]
    fn get_out_of_range_is_none() {
        let list = HeaderHashList::new(vec![UInt256::zero()]);
        assert!(list.get(1).is_none());
        assert_eq!(list.last(), Some(UInt256::zero()));
    }

    #[test]
    fn truncated_bytes_are_an_error() {
        let mut list = HeaderHashList::default();
        list.add(UInt256::hash(b"x"));
        let mut bytes = neo2_io::to_bytes(&list);
        bytes.truncate(bytes.len() - 1);
        assert!(HeaderHashList::from_bytes(&bytes).is_err());
    }
}
