//! Blocks, headers and the trimmed storage form.

use crate::transaction::{Transaction, TransactionType};
use crate::{Error, Result, UInt160, UInt256, Witness};
use neo2_crypto::merkle::merkle_root;
use neo2_io::{BinaryWriter, Error as IoError, MemoryReader, Serializable};

const MAX_TRANSACTIONS: usize = 65535;

/// The hashed part of a block plus its witness.
///
/// The block hash covers only the fields up to and including
/// `next_consensus`; the witness byte marker and script follow on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBase {
    pub version: u32,
    pub prev_hash: UInt256,
    pub merkle_root: UInt256,
    pub timestamp: u32,
    pub index: u32,
    pub consensus_data: u64,
    /// Script hash of the next round's validator multi-sig contract.
    pub next_consensus: UInt160,
    pub script: Witness,
}

impl BlockBase {
    /// Writes the fields covered by the block hash.
    pub fn serialize_hashable(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.version);
        writer.write_serializable(&self.prev_hash);
        writer.write_serializable(&self.merkle_root);
        writer.write_u32(self.timestamp);
        writer.write_u32(self.index);
        writer.write_u64(self.consensus_data);
        writer.write_serializable(&self.next_consensus);
    }

    fn deserialize_hashable(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(BlockBase {
            version: reader.read_u32()?,
            prev_hash: reader.read_serializable()?,
            merkle_root: reader.read_serializable()?,
            timestamp: reader.read_u32()?,
            index: reader.read_u32()?,
            consensus_data: reader.read_u64()?,
            next_consensus: reader.read_serializable()?,
            script: Witness::default(),
        })
    }

    /// The unsigned (hashable) encoding.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.serialize_hashable(&mut writer);
        writer.into_bytes()
    }

    /// Block hash: double SHA-256 of the hashable fields.
    pub fn hash(&self) -> UInt256 {
        UInt256::hash(&self.unsigned_bytes())
    }
}

impl Serializable for BlockBase {
    fn serialize(&self, writer: &mut BinaryWriter) {
        self.serialize_hashable(writer);
        writer.write_u8(1);
        writer.write_serializable(&self.script);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let mut base = Self::deserialize_hashable(reader)?;
        let marker = reader.read_u8()?;
        if marker != 1 {
            return Err(IoError::decoding(
                "block base",
                format!("witness marker must be 1, got {marker}"),
            ));
        }
        base.script = reader.read_serializable()?;
        Ok(base)
    }
}

/// A block header: the base plus a zero padding byte on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub base: BlockBase,
}

impl Header {
    /// Header hash equals the block hash.
    pub fn hash(&self) -> UInt256 {
        self.base.hash()
    }
}

impl Serializable for Header {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.base);
        writer.write_u8(0);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        let base = reader.read_serializable()?;
        let padding = reader.read_u8()?;
        if padding != 0 {
            return Err(IoError::decoding(
                "header",
                format!("padding must be 0, got {padding}"),
            ));
        }
        Ok(Header { base })
    }
}

/// A full block: base plus its transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub base: BlockBase,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash (over the base fields).
    pub fn hash(&self) -> UInt256 {
        self.base.hash()
    }

    /// Block height.
    pub fn index(&self) -> u32 {
        self.base.index
    }

    /// The header view of this block.
    pub fn header(&self) -> Header {
        Header {
            base: self.base.clone(),
        }
    }

    /// Merkle root recomputed from the current transaction list.
    pub fn compute_merkle_root(&self) -> Result<UInt256> {
        let hashes: Vec<[u8; 32]> = self.transactions.iter().map(|tx| tx.hash().0).collect();
        Ok(UInt256(merkle_root(&hashes)?))
    }

    /// Recomputes and stores the merkle root.
    pub fn rebuild_merkle_root(&mut self) -> Result<()> {
        self.base.merkle_root = self.compute_merkle_root()?;
        Ok(())
    }

    /// Structural checks: non-empty, miner-first, merkle root consistent.
    pub fn verify_structure(&self) -> Result<()> {
        if self.transactions.is_empty() {
            return Err(Error::validation("block has no transactions"));
        }
        if self.transactions[0].tx_type() != TransactionType::Miner {
            return Err(Error::validation(format!(
                "first transaction is {}",
                self.transactions[0].tx_type()
            )));
        }
        if self.transactions[1..]
            .iter()
            .any(|tx| tx.tx_type() == TransactionType::Miner)
        {
            return Err(Error::validation("miner transaction is not the first one"));
        }
        if self.compute_merkle_root()? != self.base.merkle_root {
            return Err(Error::validation("merkle root mismatch"));
        }
        Ok(())
    }

    /// The storage form with transactions replaced by their hashes.
    pub fn trim(&self) -> TrimmedBlock {
        TrimmedBlock {
            base: self.base.clone(),
            hashes: self.transactions.iter().map(|tx| tx.hash()).collect(),
        }
    }
}

impl Serializable for Block {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.base);
        writer.write_serializable_list(&self.transactions);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(Block {
            base: reader.read_serializable()?,
            transactions: reader.read_serializable_list(MAX_TRANSACTIONS)?,
        })
    }
}

/// The trimmed storage layout: base plus transaction hashes only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimmedBlock {
    pub base: BlockBase,
    pub hashes: Vec<UInt256>,
}

impl TrimmedBlock {
    /// Block hash (over the base fields).
    pub fn hash(&self) -> UInt256 {
        self.base.hash()
    }

    /// Rebuilds the full block given a transaction lookup.
    pub fn into_block<F>(self, mut fetch: F) -> Result<Block>
    where
        F: FnMut(&UInt256) -> Option<Transaction>,
    {
        let mut transactions = Vec::with_capacity(self.hashes.len());
        for hash in &self.hashes {
            let tx = fetch(hash)
                .ok_or_else(|| Error::validation(format!("missing transaction {hash}")))?;
            transactions.push(tx);
        }
        Ok(Block {
            base: self.base,
            transactions,
        })
    }
}

impl Serializable for TrimmedBlock {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.base);
        writer.write_serializable_list(&self.hashes);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(TrimmedBlock {
            base: reader.read_serializable()?,
            hashes: reader.read_serializable_list(MAX_TRANSACTIONS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionData;

    fn miner_tx(nonce: u32) -> Transaction {
        Transaction::new(0, TransactionData::Miner { nonce })
    }

    fn sample_block() -> Block {
        let mut block = Block {
            base: BlockBase {
                version: 0,
                prev_hash: UInt256::hash(b"prev"),
                merkle_root: UInt256::zero(),
                timestamp: 1_468_595_301,
                index: 1,
                consensus_data: 2083236893,
                next_consensus: UInt160([9u8; 20]),
                script: Witness::new(vec![0x00], vec![0x51]),
            },
            transactions: vec![miner_tx(42), Transaction::new(0, TransactionData::Contract)],
        };
        block.rebuild_merkle_root().unwrap();
        block
    }

    #[test]
    fn serialization_round_trip_is_byte_stable() {
        let block = sample_block();
        let bytes = neo2_io::to_bytes(&block);
        let parsed: Block = neo2_io::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, block);
        assert_eq!(neo2_io::to_bytes(&parsed), bytes);
    }

    #[test]
    fn hash_excludes_witness_and_transactions() {
        let mut block = sample_block();
        let before = block.hash();
        block.base.script.invocation_script = vec![0xff];
        block.transactions.pop();
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn structure_rejects_empty_and_misplaced_miner() {
        let mut block = sample_block();
        block.transactions.clear();
        assert!(block.verify_structure().is_err());

        let mut block = sample_block();
        block.transactions.push(miner_tx(7));
        block.rebuild_merkle_root().unwrap();
        assert!(block.verify_structure().is_err());

        let mut block = sample_block();
        block.transactions.swap(0, 1);
        block.rebuild_merkle_root().unwrap();
        assert!(block.verify_structure().is_err());
    }

    #[test]
    fn structure_rejects_wrong_merkle_root() {
        let mut block = sample_block();
        block.base.merkle_root = UInt256::hash(b"wrong");
        assert!(block.verify_structure().is_err());
    }

    #[test]
    fn trim_and_rebuild() {
        let block = sample_block();
        let trimmed = block.trim();
        assert_eq!(trimmed.hash(), block.hash());

        let lookup: std::collections::HashMap<_, _> = block
            .transactions
            .iter()
            .map(|tx| (tx.hash(), tx.clone()))
            .collect();
        let rebuilt = trimmed.into_block(|h| lookup.get(h).cloned()).unwrap();
        assert_eq!(rebuilt, block);
    }

    #[test]
    fn trimmed_round_trip() {
        let trimmed = sample_block().trim();
        let bytes = neo2_io::to_bytes(&trimmed);
        assert_eq!(neo2_io::from_bytes::<TrimmedBlock>(&bytes).unwrap(), trimmed);
    }

    #[test]
    fn header_round_trip_enforces_padding() {
        let header = sample_block().header();
        let mut bytes = neo2_io::to_bytes(&header);
        assert_eq!(neo2_io::from_bytes::<Header>(&bytes).unwrap(), header);
        *bytes.last_mut().unwrap() = 1;
        assert!(neo2_io::from_bytes::<Header>(&bytes).is_err());
    }
}
