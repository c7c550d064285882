//! Persistent state records the DAO stores per hash.

mod account;
mod asset;
mod coin;
mod contract;
mod storage_item;
mod validator;

pub use account::AccountState;
pub use asset::{AssetState, AssetType};
pub use coin::{CoinState, OutputState, SpentCoinState, UnspentCoinState};
pub use contract::{ContractProperties, ContractState};
pub use storage_item::StorageItem;
pub use validator::ValidatorState;
