//! Event listener
//!
//! Polls a source chain for one kind of bridge event and turns each qualifying
//! log into a [`BridgeIntent`]. The result is a lazy, infinite stream; a new
//! listener built on the same [`BridgeState`] picks up where the last one
//! committed.

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::contracts::{AuditToken, Bridge};
use crate::error::BridgeError;
use crate::metrics;
use crate::retry::RetryConfig;
use crate::state::BridgeState;
use crate::types::{BridgeIntent, LogFilter, WatchKind};

/// Where a listener starts when the state has no cursor for its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBlock {
    /// Chain head at the first poll
    Latest,
    Number(u64),
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub poll_interval: Duration,
    /// Largest `eth_getLogs` range, in blocks
    pub max_block_range: u64,
    /// Blocks behind head considered safe to read
    pub confirmations: u64,
    pub start: StartBlock,
    /// Consecutive RPC failures tolerated before the stream ends (0 = unlimited)
    pub max_reconnect_attempts: u32,
    pub retry: RetryConfig,
    /// Only relay `Transfer`s sent to this address, when set
    pub transfer_recipient: Option<Address>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_block_range: 2000,
            confirmations: 0,
            start: StartBlock::Latest,
            max_reconnect_attempts: 0,
            retry: RetryConfig::default(),
            transfer_recipient: None,
        }
    }
}

/// Outcome of decoding one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Intent(BridgeIntent),
    /// Valid event that must not be relayed; carries the reason label
    Filtered(&'static str),
}

/// Decode a raw log of `watch` kind into an intent.
///
/// Events minted by the bridge itself (zero sender) come back as
/// [`Decoded::Filtered`] so they are never relayed back.
pub fn decode_intent(
    log: &Log,
    watch: WatchKind,
    chain_id: u64,
    transfer_recipient: Option<Address>,
) -> Result<Decoded, BridgeError> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| BridgeError::Decode("missing transaction hash".to_string()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| BridgeError::Decode(format!("log in {} missing block number", tx_hash)))?;
    let log_index = log
        .log_index
        .ok_or_else(|| BridgeError::Decode(format!("log in {} missing log index", tx_hash)))?;

    if log.topics().first() != Some(&watch.topic()) {
        return Err(BridgeError::Decode(format!(
            "log {}:{} is not a {} event",
            tx_hash,
            log_index,
            watch.as_str()
        )));
    }

    let (from_address, amount, identifier) = match watch {
        WatchKind::AmountReceived => {
            let event = Bridge::AmountReceived::decode_log_data(log.data(), true).map_err(|e| {
                BridgeError::Decode(format!("AmountReceived {}:{}: {}", tx_hash, log_index, e))
            })?;
            (event.user, event.amount, Some(event.identifier))
        }
        WatchKind::Transfer => {
            let event = AuditToken::Transfer::decode_log_data(log.data(), true).map_err(|e| {
                BridgeError::Decode(format!("Transfer {}:{}: {}", tx_hash, log_index, e))
            })?;
            if let Some(recipient) = transfer_recipient {
                if event.to != recipient {
                    return Ok(Decoded::Filtered("recipient"));
                }
            }
            (event.from, event.value, None)
        }
    };

    if from_address == Address::ZERO {
        return Ok(Decoded::Filtered("zero_sender"));
    }

    Ok(Decoded::Intent(BridgeIntent {
        source_chain_id: chain_id,
        source_tx_hash: tx_hash,
        block_number,
        log_index,
        from_address,
        amount,
        identifier,
    }))
}

pub struct EventListener {
    chain: Arc<dyn ChainClient>,
    watch: WatchKind,
    state: Arc<BridgeState>,
    config: ListenerConfig,
}

impl EventListener {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        watch: WatchKind,
        state: Arc<BridgeState>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            chain,
            watch,
            state,
            config,
        }
    }

    /// Stream of intents in block and log-index order. Ends only when
    /// `max_reconnect_attempts` consecutive RPC failures have been exceeded.
    pub fn into_stream(self) -> impl Stream<Item = BridgeIntent> + Send {
        let cursor = Cursor {
            listener: self,
            next_block: None,
            buffer: VecDeque::new(),
            range_end: None,
            last_yielded_block: None,
            failures: 0,
        };

        stream::unfold(cursor, |mut cursor| async move {
            cursor.next_intent().await.map(|intent| (intent, cursor))
        })
    }

    fn chain_name(&self) -> &str {
        &self.chain.endpoint().name
    }

    fn filter(&self) -> LogFilter {
        LogFilter {
            address: self.watch.contract(self.chain.endpoint()),
            topic: self.watch.topic(),
        }
    }
}

struct Cursor {
    listener: EventListener,
    /// Next block to query; resolved on the first poll
    next_block: Option<u64>,
    buffer: VecDeque<BridgeIntent>,
    /// Last block of the range currently being drained
    range_end: Option<u64>,
    last_yielded_block: Option<u64>,
    failures: u32,
}

impl Cursor {
    async fn next_intent(&mut self) -> Option<BridgeIntent> {
        loop {
            // Reaching this point means the consumer has finished with every
            // intent yielded so far.
            self.commit_handed_over().await;

            if let Some(intent) = self.buffer.pop_front() {
                self.last_yielded_block = Some(intent.block_number);
                return Some(intent);
            }

            match self.poll_range().await {
                Ok(true) => {
                    self.failures = 0;
                }
                Ok(false) => {
                    self.failures = 0;
                    tokio::time::sleep(self.listener.config.poll_interval).await;
                }
                Err(e) => {
                    self.failures += 1;
                    let max = self.listener.config.max_reconnect_attempts;
                    if max > 0 && self.failures > max {
                        error!(
                            chain = %self.listener.chain_name(),
                            event = self.listener.watch.as_str(),
                            failures = self.failures,
                            error = %e,
                            "Listener giving up after repeated RPC failures"
                        );
                        return None;
                    }

                    let delay = self
                        .listener
                        .config
                        .retry
                        .backoff_for_attempt(self.failures - 1);
                    metrics::record_reconnect(self.listener.chain_name());
                    warn!(
                        chain = %self.listener.chain_name(),
                        event = self.listener.watch.as_str(),
                        attempt = self.failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Listener RPC error, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                    // Failure is logged by the client; the next poll retries anyway
                    let _ = self.listener.chain.reconnect().await;
                }
            }
        }
    }

    /// Advance the persisted cursor past every block whose intents have all
    /// been handed to the consumer.
    async fn commit_handed_over(&mut self) {
        let done = match (self.buffer.front(), self.last_yielded_block) {
            // Still inside the yielded block
            (Some(next), Some(last)) if next.block_number == last => None,
            (Some(next), _) => next.block_number.checked_sub(1),
            (None, _) => self.range_end.take(),
        };

        if let Some(block) = done {
            let chain_id = self.listener.chain.chain_id();
            if self.listener.state.advance_cursor(chain_id, block).await {
                metrics::record_block_processed(self.listener.chain_name(), block);
            }
        }
    }

    async fn resolve_start(&mut self, safe_head: u64) -> u64 {
        if let Some(next) = self.next_block {
            return next;
        }
        let chain_id = self.listener.chain.chain_id();
        let start = match self.listener.state.last_processed_block(chain_id).await {
            Some(committed) => committed + 1,
            None => match self.listener.config.start {
                StartBlock::Latest => safe_head,
                StartBlock::Number(n) => n,
            },
        };
        info!(
            chain = %self.listener.chain_name(),
            event = self.listener.watch.as_str(),
            start_block = start,
            "Listener started"
        );
        self.next_block = Some(start);
        start
    }

    /// Query the next block range. Returns false when there is nothing new.
    async fn poll_range(&mut self) -> Result<bool, BridgeError> {
        let chain = self.listener.chain.clone();
        let head = chain.block_number().await?;
        let safe_head = head.saturating_sub(self.listener.config.confirmations);
        let from_block = self.resolve_start(safe_head).await;

        if from_block > safe_head {
            return Ok(false);
        }
        let span = self.listener.config.max_block_range.max(1);
        let to_block = safe_head.min(from_block.saturating_add(span - 1));

        let logs = chain
            .logs(self.listener.filter(), from_block, to_block)
            .await?;

        debug!(
            chain = %self.listener.chain_name(),
            from_block,
            to_block,
            logs = logs.len(),
            "Polled block range"
        );

        self.buffer_logs(&logs);
        self.range_end = Some(to_block);
        self.next_block = Some(to_block + 1);
        Ok(true)
    }

    fn buffer_logs(&mut self, logs: &[Log]) {
        let listener = &self.listener;
        let chain_name = listener.chain_name();
        let chain_id = listener.chain.chain_id();

        for log in logs {
            if log.removed {
                warn!(
                    chain = %chain_name,
                    tx_hash = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    "Skipping removed log"
                );
                metrics::record_intent_filtered(chain_name, "removed");
                continue;
            }

            match decode_intent(
                log,
                listener.watch,
                chain_id,
                listener.config.transfer_recipient,
            ) {
                Ok(Decoded::Intent(intent)) => {
                    info!(
                        chain = %chain_name,
                        event = listener.watch.as_str(),
                        tx_hash = %intent.source_tx_hash,
                        log_index = intent.log_index,
                        block = intent.block_number,
                        from = %intent.from_address,
                        amount = %intent.amount,
                        "Bridge intent detected"
                    );
                    metrics::record_intent_detected(chain_name, listener.watch.as_str());
                    self.buffer.push_back(intent);
                }
                Ok(Decoded::Filtered(reason)) => {
                    debug!(
                        chain = %chain_name,
                        tx_hash = ?log.transaction_hash,
                        reason,
                        "Event filtered"
                    );
                    metrics::record_intent_filtered(chain_name, reason);
                }
                Err(e) => {
                    error!(
                        chain = %chain_name,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Failed to decode bridge event"
                    );
                    metrics::record_decode_error(chain_name);
                }
            }
        }
    }
}
