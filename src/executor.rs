//! Relay executor
//!
//! Takes intents from a listener and submits the mirrored call on the
//! destination chain. Submission is sequential per route; receipt tracking is
//! split out into [`PendingRelay::confirm`] so callers can pipeline several
//! relays on consecutive nonces.

use alloy::primitives::{Address, TxHash};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, TxParams};
use crate::error::{BridgeError, ErrorKind};
use crate::metrics;
use crate::nonce::NonceTracker;
use crate::retry::{classify_error, ErrorClass, RetryConfig};
use crate::state::BridgeState;
use crate::types::{BridgeIntent, RelayAction, RelayCall, RelayResult};

/// Gas limit ceiling for every relay transaction
pub const DEFAULT_GAS_LIMIT: u64 = 800_000;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub gas_limit: u64,
    pub retry: RetryConfig,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            retry: RetryConfig::default(),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(300),
        }
    }
}

/// Why an intent was not relayed at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Bridge-minted event; relaying it would start a mint loop
    ZeroSender,
    /// Already in flight or finished in this process
    AlreadyKnown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ZeroSender => "zero_sender",
            SkipReason::AlreadyKnown => "already_known",
        }
    }
}

/// Outcome of [`RelayExecutor::submit`]
pub enum Submission {
    /// Accepted by the node; await the receipt with [`PendingRelay::confirm`]
    Pending(PendingRelay),
    /// Finished without a transaction in the mempool
    Done(RelayResult),
    Skipped(SkipReason),
}

pub struct RelayExecutor {
    route: String,
    destination: Arc<dyn ChainClient>,
    action: RelayAction,
    nonces: Arc<NonceTracker>,
    state: Arc<BridgeState>,
    config: ExecutorConfig,
}

impl RelayExecutor {
    pub fn new(
        route: impl Into<String>,
        destination: Arc<dyn ChainClient>,
        action: RelayAction,
        nonces: Arc<NonceTracker>,
        state: Arc<BridgeState>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            route: route.into(),
            destination,
            action,
            nonces,
            state,
            config,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Submit the destination call for `intent`.
    ///
    /// Never submits for a zero sender and never submits the same intent key
    /// twice within the process.
    pub async fn submit(&self, intent: BridgeIntent) -> Submission {
        let key = intent.key();
        let destination_chain_id = self.destination.chain_id();

        if intent.from_address == Address::ZERO {
            warn!(route = %self.route, intent = %key, "Refusing to relay zero-sender intent");
            return Submission::Skipped(SkipReason::ZeroSender);
        }
        if !self.state.begin_intent(&intent, destination_chain_id).await {
            debug!(route = %self.route, intent = %key, "Intent already handled, skipping");
            return Submission::Skipped(SkipReason::AlreadyKnown);
        }

        let started = Instant::now();
        let call = match self.action.build_call(&intent) {
            Ok(call) => call,
            Err(e) => {
                let result = RelayResult::failed(intent, destination_chain_id, e.kind(), e.to_string());
                return Submission::Done(self.finish(result, started).await);
            }
        };

        match self.send(&call).await {
            Ok((nonce, tx_hash)) => {
                info!(
                    route = %self.route,
                    intent = %key,
                    method = call.name(),
                    nonce,
                    tx_hash = %tx_hash,
                    "Relay transaction submitted"
                );
                self.state.record_submitted(&key, nonce, tx_hash).await;
                Submission::Pending(PendingRelay {
                    route: self.route.clone(),
                    intent,
                    nonce,
                    tx_hash,
                    destination: self.destination.clone(),
                    state: self.state.clone(),
                    poll_interval: self.config.receipt_poll_interval,
                    timeout: self.config.receipt_timeout,
                    started,
                })
            }
            Err(e) => {
                let kind = match e {
                    BridgeError::DuplicateRelay(_) => ErrorKind::DuplicateRelay,
                    BridgeError::Decode(_) => ErrorKind::Decode,
                    _ => ErrorKind::SubmissionFailed,
                };
                let result = RelayResult::failed(intent, destination_chain_id, kind, e.to_string());
                Submission::Done(self.finish(result, started).await)
            }
        }
    }

    /// Submit and wait for the receipt. `None` when the intent was skipped.
    pub async fn relay(&self, intent: BridgeIntent) -> Option<RelayResult> {
        match self.submit(intent).await {
            Submission::Pending(pending) => Some(pending.confirm().await),
            Submission::Done(result) => Some(result),
            Submission::Skipped(_) => None,
        }
    }

    async fn finish(&self, result: RelayResult, started: Instant) -> RelayResult {
        finalize(&self.route, &self.destination, &self.state, result, started).await
    }

    async fn preflight(&self, call: &RelayCall) -> Result<(), BridgeError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.destination.preflight(call).await {
                Ok(()) => return Ok(()),
                Err(e @ BridgeError::Connection { .. }) if retry.should_retry(attempt) => {
                    let delay = retry.backoff_for_attempt(attempt);
                    warn!(
                        route = %self.route,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Preflight call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Preflight, reserve a nonce, and send with bounded retry. Every attempt
    /// reuses the reserved nonce so a retry can never produce a second relay.
    ///
    /// On failure the nonce is released unless some attempt may have reached
    /// the node (a transport error), in which case it stays consumed.
    async fn send(&self, call: &RelayCall) -> Result<(u64, TxHash), BridgeError> {
        self.preflight(call).await?;

        let chain_id = self.destination.chain_id();
        let chain_name = self.destination.endpoint().name.clone();
        let retry = &self.config.retry;

        let base_gas_price = self.destination.gas_price().await?;
        let mut nonce = self.nonces.reserve_nonce(chain_id).await?;
        let mut attempt: u32 = 0;
        let mut gas_bumps: u32 = 0;
        let mut resynced = false;
        let mut maybe_broadcast = false;

        loop {
            let params = TxParams {
                nonce,
                gas_limit: self.config.gas_limit,
                gas_price: retry.gas_price_for_attempt(base_gas_price, gas_bumps),
            };

            let err = match self.destination.submit(call, params).await {
                Ok(tx_hash) => return Ok((nonce, tx_hash)),
                Err(e @ BridgeError::DuplicateRelay(_)) => {
                    return Err(self.abandon(nonce, maybe_broadcast, e).await);
                }
                Err(e) => e,
            };

            let class = match &err {
                BridgeError::Connection { .. } => ErrorClass::Transient,
                BridgeError::SubmissionFailed(message) => classify_error(message),
                _ => ErrorClass::Permanent,
            };
            if class == ErrorClass::Transient {
                maybe_broadcast = true;
            }

            match class {
                // Only a first attempt can safely move to a fresh nonce: after
                // any earlier attempt the stale nonce may be our own relay.
                ErrorClass::NonceTooLow if attempt == 0 && !resynced => {
                    resynced = true;
                    let stale = nonce;
                    // Hand the stale nonce back so the reservation resyncs to
                    // the chain's pending count instead of skipping past it
                    self.nonces.release(chain_id, stale).await;
                    nonce = self.nonces.reserve_nonce(chain_id).await?;
                    warn!(
                        route = %self.route,
                        stale_nonce = stale,
                        nonce,
                        "Nonce already used on chain, retrying with a fresh nonce"
                    );
                    metrics::record_submission_retry(&chain_name, "nonce_too_low");
                }
                ErrorClass::Duplicate => {
                    let e = BridgeError::DuplicateRelay(err.to_string());
                    return Err(self.abandon(nonce, maybe_broadcast, e).await);
                }
                ErrorClass::AlreadyKnown => {
                    // The node holds a transaction at this nonce but the client
                    // could not name its hash; it may still mine
                    error!(
                        route = %self.route,
                        nonce,
                        error = %err,
                        "Node already holds a transaction for this nonce"
                    );
                    return Err(BridgeError::SubmissionFailed(format!(
                        "nonce {} already in mempool: {}",
                        nonce, err
                    )));
                }
                class if class.is_retryable() && retry.should_retry(attempt) => {
                    if class == ErrorClass::Underpriced {
                        gas_bumps += 1;
                    }
                    let delay = retry.backoff_for_attempt(attempt);
                    warn!(
                        route = %self.route,
                        nonce,
                        attempt = attempt + 1,
                        class = ?class,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Relay submission failed, retrying"
                    );
                    metrics::record_submission_retry(&chain_name, &format!("{:?}", class).to_lowercase());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                class => {
                    error!(
                        route = %self.route,
                        nonce,
                        attempts = attempt + 1,
                        class = ?class,
                        error = %err,
                        "Relay submission failed"
                    );
                    let e = BridgeError::SubmissionFailed(format!(
                        "nonce {} after {} attempt(s): {}",
                        nonce,
                        attempt + 1,
                        err
                    ));
                    return Err(self.abandon(nonce, maybe_broadcast, e).await);
                }
            }
        }
    }

    /// Give up on `nonce`, releasing it when no attempt can be in the mempool.
    async fn abandon(&self, nonce: u64, maybe_broadcast: bool, err: BridgeError) -> BridgeError {
        if maybe_broadcast {
            warn!(
                route = %self.route,
                nonce,
                "Keeping nonce reserved: an attempt may have reached the node"
            );
        } else {
            self.nonces.release(self.destination.chain_id(), nonce).await;
        }
        err
    }
}

/// A relay accepted by the node, awaiting its receipt.
pub struct PendingRelay {
    route: String,
    intent: BridgeIntent,
    nonce: u64,
    tx_hash: TxHash,
    destination: Arc<dyn ChainClient>,
    state: Arc<BridgeState>,
    poll_interval: Duration,
    timeout: Duration,
    started: Instant,
}

impl PendingRelay {
    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn intent(&self) -> &BridgeIntent {
        &self.intent
    }

    /// Poll for the receipt until it arrives or the timeout elapses.
    pub async fn confirm(self) -> RelayResult {
        let destination_chain_id = self.destination.chain_id();
        let deadline = Instant::now() + self.timeout;
        let key = self.intent.key();

        let result = loop {
            match self.destination.receipt(self.tx_hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    info!(
                        route = %self.route,
                        intent = %key,
                        tx_hash = %self.tx_hash,
                        block = ?receipt.block_number,
                        recipient = %self.intent.from_address,
                        amount = %self.intent.amount,
                        "Relay confirmed"
                    );
                    self.log_recipient_balance().await;
                    break RelayResult::confirmed(
                        self.intent.clone(),
                        destination_chain_id,
                        self.tx_hash,
                        self.nonce,
                    );
                }
                Ok(Some(receipt)) => {
                    break RelayResult::failed(
                        self.intent.clone(),
                        destination_chain_id,
                        ErrorKind::SubmissionFailed,
                        format!("reverted on chain in block {:?}", receipt.block_number),
                    )
                    .with_submission(self.tx_hash, self.nonce);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        route = %self.route,
                        tx_hash = %self.tx_hash,
                        error = %e,
                        "Failed to fetch receipt, will retry"
                    );
                }
            }

            if Instant::now() >= deadline {
                break RelayResult::failed(
                    self.intent.clone(),
                    destination_chain_id,
                    ErrorKind::ConfirmationTimeout,
                    format!("no receipt after {}s", self.timeout.as_secs()),
                )
                .with_submission(self.tx_hash, self.nonce);
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        finalize(&self.route, &self.destination, &self.state, result, self.started).await
    }

    /// Informational only; a failed query does not affect the result.
    async fn log_recipient_balance(&self) {
        let recipient = self.intent.from_address;
        match self.destination.token_balance(recipient).await {
            Ok(balance) => info!(
                chain = %self.destination.endpoint().name,
                account = %recipient,
                balance = %balance,
                "Recipient AUDT balance"
            ),
            Err(e) => debug!(account = %recipient, error = %e, "Balance query failed"),
        }
    }
}

async fn finalize(
    route: &str,
    destination: &Arc<dyn ChainClient>,
    state: &BridgeState,
    result: RelayResult,
    started: Instant,
) -> RelayResult {
    let chain = &destination.endpoint().name;
    let outcome = match result.error {
        None => "confirmed",
        Some(kind) => kind.as_str(),
    };

    match result.error {
        None => {}
        Some(ErrorKind::DuplicateRelay) => info!(
            route,
            intent = %result.intent.key(),
            "Destination already relayed this transfer"
        ),
        Some(kind) => error!(
            route,
            intent = %result.intent.key(),
            error_kind = %kind,
            message = result.message.as_deref().unwrap_or_default(),
            tx_hash = ?result.destination_tx_hash,
            "Relay failed"
        ),
    }

    metrics::record_relay(chain, outcome);
    metrics::record_latency(route, started.elapsed().as_secs_f64());
    state.record_result(&result).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainSet;
    use crate::testing::MockChain;
    use alloy::primitives::{B256, U256};

    struct Harness {
        chain: Arc<MockChain>,
        state: Arc<BridgeState>,
        executor: RelayExecutor,
    }

    fn harness(action: RelayAction) -> Harness {
        let chain = Arc::new(MockChain::new(1, "ethereum"));
        let client: Arc<dyn ChainClient> = chain.clone();
        let nonces = Arc::new(NonceTracker::new(ChainSet::from_clients(vec![client.clone()])));
        let state = Arc::new(BridgeState::new());
        let config = ExecutorConfig {
            retry: RetryConfig {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                ..Default::default()
            },
            receipt_poll_interval: Duration::from_millis(5),
            receipt_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let executor =
            RelayExecutor::new("polygon->ethereum", client, action, nonces, state.clone(), config);
        Harness {
            chain,
            state,
            executor,
        }
    }

    fn transfer_intent(log_index: u64, from: Address, amount: u64) -> BridgeIntent {
        BridgeIntent {
            source_chain_id: 137,
            source_tx_hash: B256::repeat_byte(0x99),
            block_number: 50,
            log_index,
            from_address: from,
            amount: U256::from(amount),
            identifier: None,
        }
    }

    #[tokio::test]
    async fn test_mint_submitted_once_for_transfer() {
        let h = harness(RelayAction::Mint);
        let alice = Address::repeat_byte(0xaa);
        let intent = transfer_intent(0, alice, 1_000);

        let result = h.executor.relay(intent.clone()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.nonce, Some(0));

        let submitted = h.chain.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            submitted[0].call,
            RelayCall::Mint {
                recipient: alice,
                amount: U256::from(1_000u64)
            }
        );
        assert_eq!(submitted[0].params.gas_limit, DEFAULT_GAS_LIMIT);

        // Same delivery again (listener re-delivery) is not resubmitted
        assert!(h.executor.relay(intent).await.is_none());
        assert_eq!(h.chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_sender_never_submitted() {
        let h = harness(RelayAction::Mint);
        let intent = transfer_intent(0, Address::ZERO, 5);
        assert!(matches!(
            h.executor.submit(intent).await,
            Submission::Skipped(SkipReason::ZeroSender)
        ));
        assert!(h.chain.submitted().is_empty());
        assert_eq!(h.chain.preflight_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_does_not_resubmit_confirmed_relay() {
        let h = harness(RelayAction::Mint);
        h.chain.reject_repeated_mints(true);
        let alice = Address::repeat_byte(0xaa);

        let result = h.executor.relay(transfer_intent(0, alice, 7)).await.unwrap();
        assert!(result.success);

        // A restarted process has fresh state and sees the same event again
        let chain: Arc<dyn ChainClient> = h.chain.clone();
        let restarted = RelayExecutor::new(
            "polygon->ethereum",
            chain.clone(),
            RelayAction::Mint,
            Arc::new(NonceTracker::new(ChainSet::from_clients(vec![chain]))),
            Arc::new(BridgeState::new()),
            ExecutorConfig::default(),
        );
        let result = restarted
            .relay(transfer_intent(0, alice, 7))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.error, Some(ErrorKind::DuplicateRelay));
        assert_eq!(h.chain.submitted().len(), 1);
        assert_eq!(h.chain.balance(alice), U256::from(7u64));
    }

    #[tokio::test]
    async fn test_duplicate_identifier_is_success_without_nonce() {
        let h = harness(RelayAction::CreateNewTokens);
        let id = B256::repeat_byte(0x1d);
        let alice = Address::repeat_byte(0xaa);
        h.chain.register_identifier(id, alice, U256::from(3u64));

        let mut intent = transfer_intent(0, alice, 3);
        intent.identifier = Some(id);
        assert!(h.executor.relay(intent.clone()).await.unwrap().success);

        let mut again = intent;
        again.log_index = 1;
        let result = h.executor.relay(again).await.unwrap();
        assert!(result.success);
        assert_eq!(result.error, Some(ErrorKind::DuplicateRelay));
        // The rejection came from the preflight, no nonce was consumed
        assert_eq!(h.chain.submitted().len(), 1);
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(1));
    }

    #[tokio::test]
    async fn test_missing_identifier_is_decode_failure() {
        let h = harness(RelayAction::CreateNewTokens);
        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 3))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::Decode));
        assert!(h.chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_retry_with_same_nonce() {
        let h = harness(RelayAction::Mint);
        h.chain.set_pending_nonce(4);
        h.chain
            .push_submit_error(BridgeError::connection(1, "request timed out"));
        h.chain
            .push_submit_error(BridgeError::connection(1, "502 bad gateway"));

        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.nonce, Some(4));
        assert_eq!(h.chain.submitted()[0].params.nonce, 4);
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(5));
    }

    #[tokio::test]
    async fn test_underpriced_bumps_gas() {
        let h = harness(RelayAction::Mint);
        h.chain.set_gas_price(1_000);
        h.chain.push_submit_error(BridgeError::SubmissionFailed(
            "replacement transaction underpriced".into(),
        ));

        h.executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert_eq!(h.chain.submitted()[0].params.gas_price, 1_200);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_without_retry() {
        let h = harness(RelayAction::Mint);
        h.chain.push_submit_error(BridgeError::SubmissionFailed(
            "insufficient funds for gas * price + value".into(),
        ));

        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::SubmissionFailed));
        assert!(h.chain.submitted().is_empty());

        // Failed is terminal within the process
        assert!(h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_submission_failed() {
        let h = harness(RelayAction::Mint);
        for _ in 0..4 {
            h.chain
                .push_submit_error(BridgeError::connection(1, "connection refused"));
        }
        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert_eq!(result.error, Some(ErrorKind::SubmissionFailed));
        assert!(h.chain.submitted().is_empty());
        // The node may hold one of the attempts, so nonce 0 is not handed out again
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(1));
        assert_eq!(h.state.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_nonce_resynced_on_first_attempt() {
        let h = harness(RelayAction::Mint);
        let alice = Address::repeat_byte(0xaa);

        h.executor.relay(transfer_intent(0, alice, 1)).await.unwrap();

        // The node reports the reserved nonce as used; the retry takes the
        // chain's pending count rather than skipping ahead of it
        h.chain
            .push_submit_error(BridgeError::SubmissionFailed("nonce too low".into()));
        let result = h.executor.relay(transfer_intent(1, alice, 2)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.nonce, Some(1));
        assert_eq!(h.chain.submitted().len(), 2);
        assert!(h.chain.queued_nonces().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_submission_does_not_leave_nonce_gap() {
        let h = harness(RelayAction::Mint);
        let alice = Address::repeat_byte(0xaa);
        h.chain.push_submit_error(BridgeError::SubmissionFailed(
            "insufficient funds for gas * price + value".into(),
        ));

        let failed = h.executor.relay(transfer_intent(0, alice, 1)).await.unwrap();
        assert_eq!(failed.error, Some(ErrorKind::SubmissionFailed));
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(0));
        assert_eq!(h.state.in_flight_count().await, 0);

        // The next relay takes the rejected nonce and mines
        let result = h.executor.relay(transfer_intent(1, alice, 2)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.nonce, Some(0));
        assert_eq!(h.chain.pending_nonce(), 1);
        assert!(h.chain.queued_nonces().is_empty());
    }

    #[tokio::test]
    async fn test_gas_price_failure_reserves_nothing() {
        let h = harness(RelayAction::Mint);
        let alice = Address::repeat_byte(0xaa);
        h.chain
            .push_gas_price_error(BridgeError::connection(1, "connection refused"));

        let failed = h.executor.relay(transfer_intent(0, alice, 1)).await.unwrap();
        assert_eq!(failed.error, Some(ErrorKind::SubmissionFailed));
        assert_eq!(h.executor.nonces.next_nonce(1).await, None);
        assert_eq!(h.state.in_flight_count().await, 0);

        let result = h.executor.relay(transfer_intent(1, alice, 2)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.nonce, Some(0));
    }

    #[tokio::test]
    async fn test_exhausted_underpriced_retries_release_nonce() {
        let h = harness(RelayAction::Mint);
        for _ in 0..4 {
            h.chain.push_submit_error(BridgeError::SubmissionFailed(
                "transaction underpriced".into(),
            ));
        }
        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert_eq!(result.error, Some(ErrorKind::SubmissionFailed));
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(0));
    }

    #[tokio::test]
    async fn test_lost_response_then_resend_confirms_original() {
        let h = harness(RelayAction::Mint);
        let alice = Address::repeat_byte(0xaa);
        h.chain
            .lose_next_response(BridgeError::connection(1, "request timed out"));

        let result = h.executor.relay(transfer_intent(0, alice, 9)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.error, None);
        assert_eq!(result.nonce, Some(0));

        let submitted = h.chain.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(result.destination_tx_hash, Some(submitted[0].tx_hash));
        assert_eq!(h.chain.balance(alice), U256::from(9u64));
        assert_eq!(h.state.snapshot().await.counters.confirmed, 1);
    }

    #[tokio::test]
    async fn test_already_known_without_hash_is_not_released() {
        let h = harness(RelayAction::Mint);
        h.chain
            .push_submit_error(BridgeError::connection(1, "request timed out"));
        h.chain
            .push_submit_error(BridgeError::SubmissionFailed("already known".into()));

        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert_eq!(result.error, Some(ErrorKind::SubmissionFailed));
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(1));
    }

    #[tokio::test]
    async fn test_stale_nonce_after_retry_is_not_resent() {
        let h = harness(RelayAction::Mint);
        h.chain
            .push_submit_error(BridgeError::connection(1, "request timed out"));
        h.chain
            .push_submit_error(BridgeError::SubmissionFailed("nonce too low".into()));

        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert_eq!(result.error, Some(ErrorKind::SubmissionFailed));
        assert!(h.chain.submitted().is_empty());
        assert_eq!(h.executor.nonces.next_nonce(1).await, Some(1));
    }

    #[tokio::test]
    async fn test_confirmation_timeout() {
        let h = harness(RelayAction::Mint);
        h.chain.hold_receipts(true);

        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ConfirmationTimeout));
        assert!(result.destination_tx_hash.is_some());
        assert_eq!(result.nonce, Some(0));
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_failure() {
        let h = harness(RelayAction::Mint);
        h.chain.revert_on_chain(true);

        let result = h
            .executor
            .relay(transfer_intent(0, Address::repeat_byte(0xaa), 1))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::SubmissionFailed));
    }

    #[tokio::test]
    async fn test_pipelined_relays_use_consecutive_nonces() {
        let h = harness(RelayAction::Mint);
        h.chain.hold_receipts(true);
        let alice = Address::repeat_byte(0xaa);

        let mut pending = Vec::new();
        for i in 0..3 {
            match h.executor.submit(transfer_intent(i, alice, 10 + i)).await {
                Submission::Pending(p) => pending.push(p),
                _ => panic!("expected pending relay"),
            }
        }
        assert_eq!(h.state.in_flight_count().await, 3);

        h.chain.hold_receipts(false);
        let mut nonces = Vec::new();
        for p in pending {
            let result = p.confirm().await;
            assert!(result.success);
            nonces.push(result.nonce.unwrap());
        }
        assert_eq!(nonces, vec![0, 1, 2]);
        assert_eq!(h.state.in_flight_count().await, 0);
    }
}
