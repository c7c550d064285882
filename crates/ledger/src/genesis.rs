//! Deterministic genesis block construction.

use neo2_core::state::AssetType;
use neo2_core::transaction::{Output, Transaction, TransactionData};
use neo2_core::{Block, BlockBase, Fixed8, NetworkParams, UInt160, UInt256, Witness};
use neo2_crypto::PublicKey;
use neo2_vm::contract::create_multisig_redeem_script;

/// Fixed genesis timestamp (2016-07-15T15:08:21Z).
pub const GENESIS_TIMESTAMP: u32 = 1_468_595_301;
/// Fixed genesis consensus nonce.
pub const GENESIS_NONCE: u64 = 2_083_236_893;

/// Total governing-token supply.
pub const GOVERNING_SUPPLY: i64 = 100_000_000;
/// Total utility-token supply cap.
pub const UTILITY_SUPPLY: i64 = 100_000_000;

// The secp256r1 generator point, used as the fixed owner key of the two
// native assets: a well-formed key nobody holds the scalar one for.
const NATIVE_ASSET_OWNER: [u8; 33] = [
    0x03, 0x6b, 0x17, 0xd1, 0xf2, 0xe1, 0x2c, 0x42, 0x47, 0xf8, 0xbc, 0xe6, 0xe5, 0x63, 0xa4,
    0x40, 0xf2, 0x77, 0x03, 0x7d, 0x81, 0x2d, 0xeb, 0x33, 0xa0, 0xf4, 0xa1, 0x39, 0x45, 0xd8,
    0x98, 0xc2, 0x96,
];

fn native_owner() -> PublicKey {
    PublicKey::from_bytes(&NATIVE_ASSET_OWNER).expect("generator point is a valid key")
}

/// Script hash of the trivially-true witness script (`PUSH1`).
pub fn anyone_can_spend_hash() -> UInt160 {
    UInt160::from_script(&[0x51])
}

/// The multi-sig address controlled by the validator set: `n - f` of `n`.
pub fn consensus_address(validators: &[PublicKey]) -> UInt160 {
    if validators.is_empty() {
        return anyone_can_spend_hash();
    }
    let n = validators.len();
    let m = n - (n - 1) / 3;
    let script =
        create_multisig_redeem_script(m, validators).expect("standby validator set is well-formed");
    UInt160::from_script(&script)
}

/// The governing-token register transaction.
pub fn governing_token_tx() -> Transaction {
    Transaction::new(
        0,
        TransactionData::Register {
            asset_type: AssetType::GoverningToken,
            name: "NEO".into(),
            amount: Fixed8::from_int(GOVERNING_SUPPLY),
            precision: 0,
            owner: native_owner(),
            admin: anyone_can_spend_hash(),
        },
    )
}

/// The utility-token register transaction.
pub fn utility_token_tx() -> Transaction {
    Transaction::new(
        0,
        TransactionData::Register {
            asset_type: AssetType::UtilityToken,
            name: "GAS".into(),
            amount: Fixed8::from_int(UTILITY_SUPPLY),
            precision: 8,
            owner: native_owner(),
            admin: UInt160::from_script(&[0x00]),
        },
    )
}

/// Builds the genesis block for a network: miner, the two native asset
/// registrations, and the issue moving the full governing supply to the
/// validator multi-sig address.
pub fn genesis_block(params: &NetworkParams) -> Block {
    let governing = governing_token_tx();
    let utility = utility_token_tx();

    let miner = Transaction::new(
        0,
        TransactionData::Miner {
            nonce: GENESIS_NONCE as u32,
        },
    );

    let mut issue = Transaction::new(0, TransactionData::Issue);
    issue.outputs.push(Output::new(
        governing.hash(),
        Fixed8::from_int(GOVERNING_SUPPLY),
        consensus_address(&params.standby_validators),
    ));
    issue
        .scripts
        .push(Witness::new(Vec::new(), vec![0x51]));

    let mut block = Block {
        base: BlockBase {
            version: 0,
            prev_hash: UInt256::zero(),
            merkle_root: UInt256::zero(),
            timestamp: GENESIS_TIMESTAMP,
            index: 0,
            consensus_data: GENESIS_NONCE,
            next_consensus: consensus_address(&params.standby_validators),
            script: Witness::new(Vec::new(), vec![0x51]),
        },
        transactions: vec![miner, governing, utility, issue],
    };
    block
        .rebuild_merkle_root()
        .expect("genesis has transactions");
    block
}
