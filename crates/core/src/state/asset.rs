//! Registered asset state.

use crate::{Error, Fixed8, Result, UInt160, UInt256};
use neo2_crypto::PublicKey;
use neo2_io::{BinaryWriter, MemoryReader, Serializable};

/// Asset classification byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssetType {
    GoverningToken = 0x00,
    UtilityToken = 0x01,
    Currency = 0x08,
    Token = 0x60,
    Share = 0x90,
    Invoice = 0x98,
}

impl AssetType {
    /// Parses a classification byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(Self::GoverningToken),
            0x01 => Ok(Self::UtilityToken),
            0x08 => Ok(Self::Currency),
            0x60 => Ok(Self::Token),
            0x90 => Ok(Self::Share),
            0x98 => Ok(Self::Invoice),
            other => Err(Error::format("asset type", format!("{other:#04x}"))),
        }
    }
}

/// State of a registered asset, keyed by its register-transaction hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetState {
    pub id: UInt256,
    pub asset_type: AssetType,
    pub name: String,
    /// Total registered amount; -1 raw means unbounded issuance.
    pub amount: Fixed8,
    /// Amount issued so far.
    pub available: Fixed8,
    pub precision: u8,
    pub fee: Fixed8,
    pub fee_address: UInt160,
    pub owner: PublicKey,
    pub admin: UInt160,
    pub issuer: UInt160,
    /// Height at which the asset expires.
    pub expiration: u32,
    pub is_frozen: bool,
}

impl AssetState {
    /// Remaining issuable amount.
    pub fn issuable(&self) -> Fixed8 {
        self.amount - self.available
    }

    /// Extends expiration by the given number of blocks, saturating at
    /// `u32::MAX`.
    pub fn renew(&mut self, blocks: u32) {
        self.expiration = self.expiration.saturating_add(blocks);
    }
}

impl Serializable for AssetState {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_serializable(&self.id);
        writer.write_u8(self.asset_type as u8);
        writer.write_var_string(&self.name);
        writer.write_serializable(&self.amount);
        writer.write_serializable(&self.available);
        writer.write_u8(self.precision);
        writer.write_serializable(&self.fee);
        writer.write_serializable(&self.fee_address);
        writer.write_bytes(&self.owner.to_bytes());
        writer.write_serializable(&self.admin);
        writer.write_serializable(&self.issuer);
        writer.write_u32(self.expiration);
        writer.write_bool(self.is_frozen);
    }

    fn deserialize(reader: &mut MemoryReader) -> neo2_io::Result<Self> {
        Ok(AssetState {
            id: reader.read_serializable()?,
            asset_type: AssetType::from_byte(reader.read_u8()?)
                .map_err(|e| neo2_io::Error::decoding("asset", e.to_string()))?,
            name: reader.read_var_string(1024)?,
            amount: reader.read_serializable()?,
            available: reader.read_serializable()?,
            precision: reader.read_u8()?,
            fee: reader.read_serializable()?,
            fee_address: reader.read_serializable()?,
            owner: {
                let bytes = reader.read_bytes(33)?;
                PublicKey::from_bytes(&bytes)
                    .map_err(|e| neo2_io::Error::decoding("asset owner", e.to_string()))?
            },
            admin: reader.read_serializable()?,
            issuer: reader.read_serializable()?,
            expiration: reader.read_u32()?,
            is_frozen: reader.read_bool()?,
        })
    }
}
