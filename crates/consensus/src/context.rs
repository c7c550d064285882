//! Per-round consensus state.

use crate::message::PrepareRequest;
use crate::payload::ConsensusPayload;
use crate::{quorum, ConsensusError, ConsensusResult};
use neo2_core::{Block, BlockBase, Transaction, UInt256, Witness};
use neo2_crypto::PublicKey;
use neo2_vm::contract::create_multisig_redeem_script;
use std::collections::BTreeMap;

/// The state machine's memory for one `(height, view)` round.
///
/// Message slots are indexed by validator; a slot holds the full signed
/// payload so recovery can replay evidence witnesses included.
pub struct ConsensusContext {
    pub height: u32,
    pub prev_hash: UInt256,
    pub prev_timestamp: u32,
    pub view_number: u8,
    pub validators: Vec<PublicKey>,
    pub my_index: Option<u16>,
    pub prepare_request: Option<PrepareRequest>,
    /// Payload slots: the primary's request and the backups' responses.
    pub preparation_payloads: Vec<Option<ConsensusPayload>>,
    pub commit_payloads: Vec<Option<ConsensusPayload>>,
    pub change_view_payloads: Vec<Option<ConsensusPayload>>,
    /// Proposed non-miner transactions, resolved from the pool.
    pub transactions: BTreeMap<UInt256, Transaction>,
    pub block_sent: bool,
}

impl ConsensusContext {
    /// A fresh context for the round after the given tip.
    pub fn new(
        height: u32,
        prev_hash: UInt256,
        prev_timestamp: u32,
        validators: Vec<PublicKey>,
        my_key: Option<&PublicKey>,
    ) -> Self {
        let n = validators.len();
        let my_index = my_key
            .and_then(|key| validators.iter().position(|v| v == key))
            .map(|i| i as u16);
        ConsensusContext {
            height,
            prev_hash,
            prev_timestamp,
            view_number: 0,
            validators,
            my_index,
            prepare_request: None,
            preparation_payloads: vec![None; n],
            commit_payloads: vec![None; n],
            change_view_payloads: vec![None; n],
            transactions: BTreeMap::new(),
            block_sent: false,
        }
    }

    /// Number of validators.
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Messages required to certify a phase.
    pub fn quorum(&self) -> usize {
        quorum(self.validator_count())
    }

    /// Primary validator index for a view: `(height + view) % n`.
    pub fn primary_index(&self, view: u8) -> u16 {
        ((self.height as u64 + view as u64) % self.validator_count() as u64) as u16
    }

    /// Whether this node is the primary for the current view.
    pub fn is_primary(&self) -> bool {
        self.my_index == Some(self.primary_index(self.view_number))
    }

    /// Enters a new view, dropping phase state that no longer counts.
    /// Change-view evidence survives; stale preparations must not leak
    /// into the new view's commit count.
    pub fn reset_for_view(&mut self, view: u8) {
        let n = self.validator_count();
        self.view_number = view;
        self.prepare_request = None;
        self.preparation_payloads = vec![None; n];
        self.commit_payloads = vec![None; n];
        self.transactions.clear();
        self.block_sent = false;
    }

    /// Count of recorded preparations (request plus responses).
    pub fn preparation_count(&self) -> usize {
        self.preparation_payloads.iter().flatten().count()
    }

    /// Count of recorded commits.
    pub fn commit_count(&self) -> usize {
        self.commit_payloads.iter().flatten().count()
    }

    /// Count of change-view messages targeting exactly `target`.
    pub fn change_view_count(&self, target: u8, state_root_enabled: bool) -> usize {
        self.change_view_payloads
            .iter()
            .flatten()
            .filter(|payload| {
                matches!(
                    payload.message(state_root_enabled),
                    Ok((crate::message::ConsensusMessage::ChangeView(cv), _))
                        if cv.new_view_number == target
                )
            })
            .count()
    }

    /// Payload hash of the accepted prepare request, once present.
    pub fn preparation_hash(&self) -> Option<UInt256> {
        let primary = self.primary_index(self.view_number) as usize;
        self.preparation_payloads
            .get(primary)?
            .as_ref()
            .map(ConsensusPayload::hash)
    }

    /// Builds the block described by the accepted prepare request, without
    /// its witness.
    pub fn create_block(&self) -> ConsensusResult<Block> {
        let request = self
            .prepare_request
            .as_ref()
            .ok_or_else(|| ConsensusError::invalid("no prepare request accepted"))?;

        let mut transactions = vec![request.miner_tx.clone()];
        for hash in &request.transaction_hashes {
            let tx = self
                .transactions
                .get(hash)
                .cloned()
                .ok_or_else(|| ConsensusError::invalid(format!("missing transaction {hash}")))?;
            transactions.push(tx);
        }

        let mut block = Block {
            base: BlockBase {
                version: 0,
                prev_hash: self.prev_hash,
                merkle_root: UInt256::zero(),
                timestamp: request.timestamp,
                index: self.height,
                consensus_data: request.nonce,
                next_consensus: request.next_consensus,
                script: Witness::default(),
            },
            transactions,
        };
        block.rebuild_merkle_root()?;
        Ok(block)
    }

    /// Assembles the block witness from `m` commit signatures, pushed in
    /// canonical key order to satisfy `CHECKMULTISIG`.
    pub fn make_block_witness(&self) -> ConsensusResult<Witness> {
        let m = self.quorum();
        let verification = create_multisig_redeem_script(m, &self.validators)
            .map_err(|e| ConsensusError::invalid(e.to_string()))?;

        let mut sorted: Vec<(usize, &PublicKey)> = self.validators.iter().enumerate().collect();
        sorted.sort_by_key(|(_, key)| key.to_bytes());

        let mut invocation = Vec::new();
        let mut pushed = 0;
        for (index, _) in sorted {
            if pushed == m {
                break;
            }
            if let Some(payload) = &self.commit_payloads[index] {
                // Commit bodies carry no state-root field, so the flag does
                // not affect decoding here.
                if let Ok((crate::message::ConsensusMessage::Commit(commit), _)) =
                    payload.message(false)
                {
                    invocation.push(0x40);
                    invocation.extend_from_slice(&commit.signature);
                    pushed += 1;
                }
            }
        }
        if pushed < m {
            return Err(ConsensusError::invalid(format!(
                "only {pushed} of {m} commit signatures available"
            )));
        }
        Ok(Witness::new(invocation, verification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo2_crypto::KeyPair;

    fn context(n: usize, height: u32) -> ConsensusContext {
        let validators: Vec<PublicKey> =
            (0..n).map(|_| *KeyPair::generate().public_key()).collect();
        ConsensusContext::new(height, UInt256::hash(b"prev"), 0, validators, None)
    }

    #[test]
    fn primary_rotates_with_height_and_view() {
        let ctx = context(4, 8);
        assert_eq!(ctx.primary_index(0), 0); // 8 % 4
        assert_eq!(ctx.primary_index(1), 1); // (8 + 1) % 4
        let ctx = context(4, 9);
        assert_eq!(ctx.primary_index(0), 1);
    }

    #[test]
    fn quorum_for_four_is_three() {
        let ctx = context(4, 1);
        assert_eq!(ctx.quorum(), 3);
    }

    #[test]
    fn view_reset_clears_phase_state() {
        let mut ctx = context(4, 1);
        ctx.preparation_payloads[0] = Some(crate::payload::ConsensusPayload::new(
            ctx.prev_hash,
            1,
            0,
            0,
            &crate::message::ConsensusMessage::RecoveryRequest(
                crate::message::RecoveryRequest { timestamp: 0 },
            ),
            0,
            false,
        ));
        ctx.reset_for_view(1);
        assert_eq!(ctx.view_number, 1);
        assert_eq!(ctx.preparation_count(), 0);
        assert_eq!(ctx.commit_count(), 0);
    }
}
