//! The dBFT service: message handling, timer contract, block production.

use crate::context::ConsensusContext;
use crate::message::{
    ChangeView, ChangeViewCompact, Commit, CommitCompact, ConsensusMessage, PrepareRequest,
    PrepareResponse, PreparationCompact, RecoveryMessage, RecoveryRequest,
};
use crate::payload::ConsensusPayload;
use crate::{ConsensusError, ConsensusResult};
use neo2_core::transaction::{Transaction, TransactionData, TransactionType};
use neo2_core::{UInt256, Witness};
use neo2_crypto::KeyPair;
use neo2_ledger::blockchain::Blockchainer;
use neo2_ledger::genesis::consensus_address;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Static consensus configuration.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Whether prepare messages carry state-root signatures.
    pub state_root_enabled: bool,
    /// Base view timeout; doubles per failed view.
    pub seconds_per_block: u32,
    /// Cap on transactions packed into a proposal.
    pub max_transactions_per_block: usize,
}

impl ConsensusConfig {
    /// Derives the config from network parameters.
    pub fn from_params(params: &neo2_core::NetworkParams) -> Self {
        ConsensusConfig {
            state_root_enabled: params.state_root_enabled,
            seconds_per_block: params.seconds_per_block,
            max_transactions_per_block: params.max_transactions_per_block,
        }
    }

    /// Timeout for a view: doubling per failed round.
    pub fn view_timeout_secs(&self, view: u8) -> u64 {
        u64::from(self.seconds_per_block) << (u32::from(view) + 1).min(12)
    }
}

/// One validator's consensus state machine.
///
/// All inputs are explicit: payloads through [`on_payload`], time through
/// [`on_timer`] and the `now` arguments. Outgoing payloads accumulate in an
/// outbox the node loop drains and relays; accepted blocks go straight to
/// the engine, bypassing the block queue.
///
/// [`on_payload`]: ConsensusService::on_payload
/// [`on_timer`]: ConsensusService::on_timer
pub struct ConsensusService<B: Blockchainer> {
    chain: Arc<B>,
    key: KeyPair,
    config: ConsensusConfig,
    context: Mutex<ConsensusContext>,
    outbox: Mutex<Vec<ConsensusPayload>>,
    deadline: Mutex<u64>,
}

impl<B: Blockchainer> ConsensusService<B> {
    /// Creates the service and opens the first round. Fails when the key is
    /// not in the validator set.
    pub fn new(chain: Arc<B>, key: KeyPair, config: ConsensusConfig) -> ConsensusResult<Self> {
        let validators = chain.params().standby_validators.clone();
        if !validators.iter().any(|v| v == key.public_key()) {
            return Err(ConsensusError::NotValidator);
        }
        let service = ConsensusService {
            chain,
            key,
            config,
            context: Mutex::new(ConsensusContext::new(
                0,
                UInt256::zero(),
                0,
                validators,
                None,
            )),
            outbox: Mutex::new(Vec::new()),
            deadline: Mutex::new(u64::MAX),
        };
        Ok(service)
    }

    /// Opens the round for the next block; the primary proposes when its
    /// block timer fires.
    pub fn start(&self, now: u32) -> ConsensusResult<()> {
        let mut context = self.context.lock();
        self.begin_round(&mut context, now)?;
        Ok(())
    }

    /// Takes everything queued for broadcast.
    pub fn drain_outbox(&self) -> Vec<ConsensusPayload> {
        std::mem::take(&mut *self.outbox.lock())
    }

    /// The absolute deadline (seconds) of the running view timer.
    pub fn timer_deadline(&self) -> u64 {
        *self.deadline.lock()
    }

    /// Current view number.
    pub fn view_number(&self) -> u8 {
        self.context.lock().view_number
    }

    /// Height the service is working on.
    pub fn working_height(&self) -> u32 {
        self.context.lock().height
    }

    fn begin_round(&self, context: &mut ConsensusContext, now: u32) -> ConsensusResult<()> {
        let height = self.chain.block_height() + 1;
        let prev_hash = self.chain.current_hash();
        let prev_timestamp = self
            .chain
            .get_block(&prev_hash)?
            .map(|b| b.base.timestamp)
            .unwrap_or(0);
        *context = ConsensusContext::new(
            height,
            prev_hash,
            prev_timestamp,
            self.chain.params().standby_validators.clone(),
            Some(self.key.public_key()),
        );
        // The primary waits one block interval before proposing; backups
        // run the doubled view timeout before voting to change view.
        let timeout = if context.is_primary() {
            u64::from(self.config.seconds_per_block)
        } else {
            self.config.view_timeout_secs(0)
        };
        *self.deadline.lock() = u64::from(now) + timeout;
        debug!(height, primary = context.primary_index(0), "consensus round opened");
        Ok(())
    }

    // ---- outbound --------------------------------------------------------

    fn broadcast(
        &self,
        context: &ConsensusContext,
        message: &ConsensusMessage,
        timestamp: u32,
    ) -> ConsensusResult<Option<ConsensusPayload>> {
        let Some(my_index) = context.my_index else {
            return Ok(None);
        };
        let mut payload = ConsensusPayload::new(
            context.prev_hash,
            context.height,
            my_index,
            timestamp,
            message,
            context.view_number,
            self.config.state_root_enabled,
        );
        payload
            .sign(&self.key)
            .map_err(|e| ConsensusError::invalid(e.to_string()))?;
        self.outbox.lock().push(payload.clone());
        Ok(Some(payload))
    }

    fn send_prepare_request(
        &self,
        context: &mut ConsensusContext,
        now: u32,
    ) -> ConsensusResult<()> {
        let pooled = self
            .chain
            .pooled_transactions(self.config.max_transactions_per_block);
        let mut transactions = BTreeMap::new();
        let mut hashes = Vec::new();
        for tx in pooled {
            if tx.tx_type() == TransactionType::Miner {
                continue;
            }
            hashes.push(tx.hash());
            transactions.insert(tx.hash(), tx);
        }

        let miner_tx = Transaction::new(
            0,
            TransactionData::Miner {
                nonce: rand::thread_rng().gen(),
            },
        );
        let request = PrepareRequest {
            timestamp: now.max(context.prev_timestamp + 1),
            nonce: u64::from(rand::thread_rng().gen::<u32>()),
            next_consensus: consensus_address(&context.validators),
            transaction_hashes: hashes,
            miner_tx,
            state_root_sig: self.state_root_signature()?,
        };

        context.prepare_request = Some(request.clone());
        context.transactions = transactions;
        let payload = self.broadcast(
            context,
            &ConsensusMessage::PrepareRequest(request.clone()),
            request.timestamp,
        )?;
        if let (Some(payload), Some(my_index)) = (payload, context.my_index) {
            context.preparation_payloads[my_index as usize] = Some(payload);
        }
        info!(height = context.height, view = context.view_number, "prepare request sent");
        Ok(())
    }

    fn state_root_signature(&self) -> ConsensusResult<Option<[u8; 64]>> {
        if !self.config.state_root_enabled {
            return Ok(None);
        }
        // The predicted root for the proposed block equals the current root
        // when no storage mutations are pending; sign what we expect.
        let root = self.chain.current_state_root();
        let digest = neo2_crypto::double_sha256(root.as_bytes());
        let signature = self
            .key
            .sign_hash(&digest)
            .map_err(|e| ConsensusError::invalid(e.to_string()))?;
        Ok(Some(signature.0))
    }

    // ---- inbound ---------------------------------------------------------

    /// Feeds one relayed payload through the state machine.
    pub fn on_payload(&self, payload: &ConsensusPayload, now: u32) -> ConsensusResult<()> {
        let mut context = self.context.lock();

        if payload.height != context.height {
            return Err(ConsensusError::invalid(format!(
                "payload height {} does not match working height {}",
                payload.height, context.height
            )));
        }
        if payload.prev_hash != context.prev_hash {
            return Err(ConsensusError::invalid("previous hash mismatch"));
        }
        let index = payload.validator_index as usize;
        if index >= context.validator_count() {
            return Err(ConsensusError::invalid("validator index out of range"));
        }
        if Some(payload.validator_index) == context.my_index {
            return Ok(()); // own broadcast echoed back
        }
        if !payload.verify(&context.validators[index]) {
            return Err(ConsensusError::invalid("payload witness failed"));
        }

        let (message, view) = payload
            .message(self.config.state_root_enabled)
            .map_err(|e| ConsensusError::invalid(e.to_string()))?;
        self.dispatch(&mut context, payload, message, view, now)
    }

    fn dispatch(
        &self,
        context: &mut ConsensusContext,
        payload: &ConsensusPayload,
        message: ConsensusMessage,
        view: u8,
        now: u32,
    ) -> ConsensusResult<()> {
        match message {
            ConsensusMessage::ChangeView(cv) => self.on_change_view(context, payload, cv, now),
            ConsensusMessage::PrepareRequest(request) => {
                self.on_prepare_request(context, payload, request, view, now)
            }
            ConsensusMessage::PrepareResponse(response) => {
                self.on_prepare_response(context, payload, response, view, now)
            }
            ConsensusMessage::Commit(commit) => {
                self.on_commit(context, payload, commit, view, now)
            }
            ConsensusMessage::RecoveryRequest(_) => self.on_recovery_request(context),
            ConsensusMessage::RecoveryMessage(recovery) => {
                self.on_recovery_message(context, recovery, view, now)
            }
        }
    }

    fn on_prepare_request(
        &self,
        context: &mut ConsensusContext,
        payload: &ConsensusPayload,
        request: PrepareRequest,
        view: u8,
        now: u32,
    ) -> ConsensusResult<()> {
        if view != context.view_number {
            return Ok(());
        }
        if payload.validator_index != context.primary_index(view) {
            return Err(ConsensusError::invalid("prepare request not from primary"));
        }
        if context.prepare_request.is_some() {
            return Ok(());
        }
        if request.miner_tx.tx_type() != TransactionType::Miner {
            return Err(ConsensusError::invalid("proposal lacks a miner transaction"));
        }
        if request.timestamp <= context.prev_timestamp {
            return Err(ConsensusError::invalid("proposal timestamp not increasing"));
        }

        // Resolve the listed transactions from the pool; an incomplete pool
        // means we stay silent and let the view change.
        let pooled: BTreeMap<UInt256, Transaction> = self
            .chain
            .pooled_transactions(usize::MAX)
            .into_iter()
            .map(|tx| (tx.hash(), tx))
            .collect();
        let mut resolved = BTreeMap::new();
        for hash in &request.transaction_hashes {
            match pooled.get(hash) {
                Some(tx) => {
                    resolved.insert(*hash, tx.clone());
                }
                None => {
                    debug!(%hash, "proposal transaction not pooled, withholding response");
                    return Ok(());
                }
            }
        }

        context.prepare_request = Some(request.clone());
        context.transactions = resolved;
        context.preparation_payloads[payload.validator_index as usize] = Some(payload.clone());

        // Respond with the preparation hash.
        let response = ConsensusMessage::PrepareResponse(PrepareResponse {
            preparation_hash: payload.hash(),
            state_root_sig: self.state_root_signature()?,
        });
        let response_payload = self.broadcast(context, &response, request.timestamp)?;
        if let (Some(response_payload), Some(my_index)) = (response_payload, context.my_index) {
            context.preparation_payloads[my_index as usize] = Some(response_payload);
        }

        self.check_preparations(context, now)
    }

    fn on_prepare_response(
        &self,
        context: &mut ConsensusContext,
        payload: &ConsensusPayload,
        response: PrepareResponse,
        view: u8,
        now: u32,
    ) -> ConsensusResult<()> {
        if view != context.view_number {
            return Ok(());
        }
        let Some(expected) = context.preparation_hash() else {
            // No request accepted yet; the network layer re-delivers later.
            return Ok(());
        };
        if response.preparation_hash != expected {
            return Err(ConsensusError::invalid("response references another proposal"));
        }
        let index = payload.validator_index as usize;
        if context.preparation_payloads[index].is_none() {
            context.preparation_payloads[index] = Some(payload.clone());
        }
        self.check_preparations(context, now)
    }

    fn on_commit(
        &self,
        context: &mut ConsensusContext,
        payload: &ConsensusPayload,
        commit: Commit,
        view: u8,
        now: u32,
    ) -> ConsensusResult<()> {
        if view != context.view_number {
            return Ok(());
        }
        // The commit signature must cover the block we derived.
        if context.prepare_request.is_some() {
            let block = context.create_block()?;
            let digest = neo2_crypto::double_sha256(&block.base.unsigned_bytes());
            let signature = neo2_crypto::Signature(commit.signature);
            let index = payload.validator_index as usize;
            if !context.validators[index].verify_hash(&digest, &signature) {
                return Err(ConsensusError::invalid("commit signature invalid"));
            }
        }
        let index = payload.validator_index as usize;
        if context.commit_payloads[index].is_none() {
            context.commit_payloads[index] = Some(payload.clone());
        }
        self.check_commits(context, now)
    }

    fn on_change_view(
        &self,
        context: &mut ConsensusContext,
        payload: &ConsensusPayload,
        change_view: ChangeView,
        now: u32,
    ) -> ConsensusResult<()> {
        let target = context.view_number + 1;
        if change_view.new_view_number != target {
            return Err(ConsensusError::invalid(format!(
                "change view targets {} but the next view is {target}",
                change_view.new_view_number
            )));
        }
        let index = payload.validator_index as usize;
        context.change_view_payloads[index] = Some(payload.clone());
        self.try_change_view(context, now)
    }

    fn try_change_view(&self, context: &mut ConsensusContext, now: u32) -> ConsensusResult<()> {
        let target = context.view_number + 1;
        let count = context.change_view_count(target, self.config.state_root_enabled);
        if count < context.quorum() {
            return Ok(());
        }
        info!(height = context.height, view = target, "view change");
        context.reset_for_view(target);
        *self.deadline.lock() = u64::from(now) + self.config.view_timeout_secs(target);
        if context.is_primary() {
            self.send_prepare_request(context, now)?;
        }
        Ok(())
    }

    fn on_recovery_request(&self, context: &mut ConsensusContext) -> ConsensusResult<()> {
        let mut recovery = RecoveryMessage::default();

        for payload in context.change_view_payloads.iter().flatten() {
            if let Ok((ConsensusMessage::ChangeView(cv), _)) =
                payload.message(self.config.state_root_enabled)
            {
                recovery.change_views.push(ChangeViewCompact {
                    validator_index: payload.validator_index,
                    original_view_number: cv.new_view_number.wrapping_sub(1),
                    timestamp: cv.timestamp,
                    invocation_script: payload.witness.invocation_script.clone(),
                });
            }
        }

        recovery.prepare_request = context.prepare_request.clone();
        if recovery.prepare_request.is_none() {
            recovery.preparation_hash = context.preparation_hash();
        }

        for payload in context.preparation_payloads.iter().flatten() {
            recovery.preparations.push(PreparationCompact {
                validator_index: payload.validator_index,
                invocation_script: payload.witness.invocation_script.clone(),
            });
        }

        for payload in context.commit_payloads.iter().flatten() {
            if let Ok((ConsensusMessage::Commit(commit), commit_view)) =
                payload.message(self.config.state_root_enabled)
            {
                recovery.commits.push(CommitCompact {
                    view_number: commit_view,
                    validator_index: payload.validator_index,
                    signature: commit.signature,
                    invocation_script: payload.witness.invocation_script.clone(),
                });
            }
        }

        let timestamp = context
            .prepare_request
            .as_ref()
            .map(|r| r.timestamp)
            .unwrap_or(context.prev_timestamp + 1);
        self.broadcast(context, &ConsensusMessage::RecoveryMessage(recovery), timestamp)?;
        Ok(())
    }

    fn on_recovery_message(
        &self,
        context: &mut ConsensusContext,
        recovery: RecoveryMessage,
        view: u8,
        now: u32,
    ) -> ConsensusResult<()> {
        // Replay the prepare request first so responses can bind to it.
        if context.view_number == view {
            if let Some(request) = recovery.prepare_request.clone() {
                let primary = context.primary_index(view);
                let rebuilt = self.rebuild_payload(
                    context,
                    primary,
                    request.timestamp,
                    &ConsensusMessage::PrepareRequest(request.clone()),
                    view,
                    recovery
                        .preparations
                        .iter()
                        .find(|p| p.validator_index == primary)
                        .map(|p| p.invocation_script.clone())
                        .unwrap_or_default(),
                );
                if rebuilt.verify(&context.validators[primary as usize]) {
                    self.on_prepare_request(context, &rebuilt, request, view, now)?;
                }
            }

            if let Some(expected) = context.preparation_hash() {
                let request_timestamp = context
                    .prepare_request
                    .as_ref()
                    .map(|r| r.timestamp)
                    .unwrap_or(0);
                let primary = context.primary_index(view);
                for compact in &recovery.preparations {
                    if compact.validator_index == primary {
                        continue;
                    }
                    let response = PrepareResponse {
                        preparation_hash: expected,
                        state_root_sig: None,
                    };
                    let rebuilt = self.rebuild_payload(
                        context,
                        compact.validator_index,
                        request_timestamp,
                        &ConsensusMessage::PrepareResponse(response.clone()),
                        view,
                        compact.invocation_script.clone(),
                    );
                    if rebuilt.verify(&context.validators[compact.validator_index as usize]) {
                        self.on_prepare_response(context, &rebuilt, response, view, now)?;
                    }
                }

                for compact in &recovery.commits {
                    if compact.view_number != context.view_number {
                        continue;
                    }
                    let commit = Commit {
                        signature: compact.signature,
                    };
                    let rebuilt = self.rebuild_payload(
                        context,
                        compact.validator_index,
                        request_timestamp,
                        &ConsensusMessage::Commit(commit.clone()),
                        compact.view_number,
                        compact.invocation_script.clone(),
                    );
                    if rebuilt.verify(&context.validators[compact.validator_index as usize]) {
                        self.on_commit(context, &rebuilt, commit, compact.view_number, now)?;
                    }
                }
            }
        }

        // Change-view evidence counts regardless of our phase.
        for compact in &recovery.change_views {
            if compact.original_view_number != context.view_number {
                continue;
            }
            let change_view = ChangeView {
                new_view_number: compact.original_view_number + 1,
                timestamp: compact.timestamp,
            };
            let rebuilt = self.rebuild_payload(
                context,
                compact.validator_index,
                compact.timestamp,
                &ConsensusMessage::ChangeView(change_view.clone()),
                compact.original_view_number,
                compact.invocation_script.clone(),
            );
            if (compact.validator_index as usize) < context.validator_count()
                && rebuilt.verify(&context.validators[compact.validator_index as usize])
            {
                self.on_change_view(context, &rebuilt, change_view, now)?;
            }
        }
        Ok(())
    }

    /// Reconstructs a peer's payload from recovery evidence. Verification
    /// against the peer's key proves the reconstruction is faithful.
    fn rebuild_payload(
        &self,
        context: &ConsensusContext,
        validator_index: u16,
        timestamp: u32,
        message: &ConsensusMessage,
        view: u8,
        invocation_script: Vec<u8>,
    ) -> ConsensusPayload {
        let mut payload = ConsensusPayload::new(
            context.prev_hash,
            context.height,
            validator_index,
            timestamp,
            message,
            view,
            self.config.state_root_enabled,
        );
        let key = &context.validators[validator_index as usize % context.validator_count()];
        payload.witness = Witness::new(
            invocation_script,
            neo2_vm::contract::create_signature_redeem_script(key),
        );
        payload
    }

    // ---- phase checks ----------------------------------------------------

    fn check_preparations(&self, context: &mut ConsensusContext, now: u32) -> ConsensusResult<()> {
        if context.prepare_request.is_none() {
            return Ok(());
        }
        let Some(my_index) = context.my_index else {
            return Ok(());
        };
        if context.commit_payloads[my_index as usize].is_some() {
            return Ok(());
        }
        if context.preparation_count() < context.quorum() {
            return Ok(());
        }

        // Enough preparations: sign the block and commit.
        let block = context.create_block()?;
        let digest = neo2_crypto::double_sha256(&block.base.unsigned_bytes());
        let signature = self
            .key
            .sign_hash(&digest)
            .map_err(|e| ConsensusError::invalid(e.to_string()))?;
        let timestamp = context
            .prepare_request
            .as_ref()
            .map(|r| r.timestamp)
            .unwrap_or(now);
        let payload = self.broadcast(
            context,
            &ConsensusMessage::Commit(Commit {
                signature: signature.0,
            }),
            timestamp,
        )?;
        if let Some(payload) = payload {
            context.commit_payloads[my_index as usize] = Some(payload);
        }
        debug!(height = context.height, "commit sent");
        self.check_commits(context, now)
    }

    fn check_commits(&self, context: &mut ConsensusContext, now: u32) -> ConsensusResult<()> {
        if context.block_sent || context.prepare_request.is_none() {
            return Ok(());
        }
        if context.commit_count() < context.quorum() {
            return Ok(());
        }

        let mut block = context.create_block()?;
        block.base.script = context.make_block_witness()?;
        context.block_sent = true;
        info!(height = context.height, hash = %block.hash(), "consensus block assembled");

        // Straight to the engine; the queue is for relayed blocks.
        match self.chain.add_block(block) {
            Ok(()) => {}
            Err(err) => {
                // Another path may have landed the block already.
                if self.chain.block_height() < context.height {
                    warn!(error = %err, "assembled block rejected");
                    return Err(err.into());
                }
            }
        }
        self.begin_round(context, now)
    }

    // ---- timer -----------------------------------------------------------

    /// Fires the view timer. The primary's first expiry sends the block
    /// proposal; any later expiry (or a backup's) votes to change view with
    /// a doubled timeout for the next one.
    pub fn on_timer(&self, now: u32) -> ConsensusResult<()> {
        {
            let deadline = *self.deadline.lock();
            if u64::from(now) < deadline {
                return Ok(());
            }
        }
        let mut context = self.context.lock();
        if context.block_sent {
            return Ok(());
        }
        if context.is_primary() && context.prepare_request.is_none() {
            self.send_prepare_request(&mut context, now)?;
            *self.deadline.lock() =
                u64::from(now) + self.config.view_timeout_secs(context.view_number);
            return Ok(());
        }
        let target = context.view_number + 1;
        debug!(height = context.height, target, "view timer expired");

        let message = ConsensusMessage::ChangeView(ChangeView {
            new_view_number: target,
            timestamp: now,
        });
        let payload = self.broadcast(&context, &message, now)?;
        if let (Some(payload), Some(my_index)) = (payload, context.my_index) {
            context.change_view_payloads[my_index as usize] = Some(payload);
        }
        *self.deadline.lock() =
            u64::from(now) + self.config.view_timeout_secs(target);
        self.try_change_view(&mut context, now)
    }

    /// Asks any peer for a recovery snapshot of the current round.
    pub fn request_recovery(&self, now: u32) -> ConsensusResult<()> {
        let context = self.context.lock();
        self.broadcast(
            &context,
            &ConsensusMessage::RecoveryRequest(RecoveryRequest { timestamp: now }),
            now,
        )?;
        Ok(())
    }
}
