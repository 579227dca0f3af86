//! Process-wide relay state
//!
//! Shared between listeners, the executor, and the status API through an
//! `Arc<BridgeState>`. Nothing here is persisted; a restart re-scans from the
//! configured start block.

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

use crate::bounded_cache::{
    BoundedCache, DEFAULT_FINISHED_CACHE_SIZE, DEFAULT_FINISHED_CACHE_TTL_SECS,
};
use crate::error::ErrorKind;
use crate::types::{BridgeIntent, IntentKey, RelayResult, RelayStatus};

/// Default number of finished results kept for `/status`.
pub const DEFAULT_RECENT_RESULTS: usize = 100;

/// A relay that has been claimed by the executor but not finalized.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightRelay {
    pub intent: BridgeIntent,
    pub destination_chain_id: u64,
    pub nonce: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub status: RelayStatus,
    pub claimed_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayCounters {
    pub confirmed: u64,
    pub duplicate: u64,
    pub failed: u64,
}

/// Serializable view of the state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub started_at: DateTime<Utc>,
    pub cursors: BTreeMap<u64, u64>,
    pub in_flight: Vec<InFlightRelay>,
    pub finished: usize,
    pub counters: RelayCounters,
    pub recent: Vec<RelayResult>,
}

struct Inner {
    cursors: HashMap<u64, u64>,
    in_flight: HashMap<IntentKey, InFlightRelay>,
    // value: whether the relay ended successfully
    finished: BoundedCache<IntentKey, bool>,
    recent: VecDeque<RelayResult>,
    recent_capacity: usize,
    counters: RelayCounters,
}

pub struct BridgeState {
    inner: Mutex<Inner>,
    started_at: DateTime<Utc>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeState {
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_FINISHED_CACHE_SIZE,
            DEFAULT_FINISHED_CACHE_TTL_SECS,
            DEFAULT_RECENT_RESULTS,
        )
    }

    pub fn with_limits(finished_size: usize, finished_ttl_secs: u64, recent: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cursors: HashMap::new(),
                in_flight: HashMap::new(),
                finished: BoundedCache::new(finished_size, finished_ttl_secs),
                recent: VecDeque::with_capacity(recent),
                recent_capacity: recent,
                counters: RelayCounters::default(),
            }),
            started_at: Utc::now(),
        }
    }

    /// Highest block fully handed to the executor for `chain_id`.
    pub async fn last_processed_block(&self, chain_id: u64) -> Option<u64> {
        self.inner.lock().await.cursors.get(&chain_id).copied()
    }

    /// Move the cursor forward. Returns false (and leaves the cursor alone)
    /// if `block` is not past the current value.
    pub async fn advance_cursor(&self, chain_id: u64, block: u64) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.cursors.get(&chain_id) {
            Some(current) if *current >= block => false,
            _ => {
                inner.cursors.insert(chain_id, block);
                true
            }
        }
    }

    /// Whether the intent is in flight or has already finished in this process.
    pub async fn is_known(&self, key: &IntentKey) -> bool {
        let inner = self.inner.lock().await;
        inner.in_flight.contains_key(key) || inner.finished.contains_key(key)
    }

    /// Claim an intent for relaying. Returns false if it was already claimed
    /// or finished, in which case the caller must not submit it.
    pub async fn begin_intent(&self, intent: &BridgeIntent, destination_chain_id: u64) -> bool {
        let key = intent.key();
        let mut inner = self.inner.lock().await;
        if inner.in_flight.contains_key(&key) || inner.finished.contains_key(&key) {
            debug!(intent = %key, "Intent already claimed");
            return false;
        }
        inner.in_flight.insert(
            key,
            InFlightRelay {
                intent: intent.clone(),
                destination_chain_id,
                nonce: None,
                tx_hash: None,
                status: RelayStatus::Submitted,
                claimed_at: Utc::now(),
                submitted_at: None,
            },
        );
        true
    }

    /// Record that the node accepted the relay transaction.
    pub async fn record_submitted(&self, key: &IntentKey, nonce: u64, tx_hash: TxHash) {
        let mut inner = self.inner.lock().await;
        if let Some(relay) = inner.in_flight.get_mut(key) {
            relay.nonce = Some(nonce);
            relay.tx_hash = Some(tx_hash);
            relay.submitted_at = Some(Utc::now());
        }
    }

    /// Finalize a relay. The intent key stays known so it is never resubmitted.
    pub async fn record_result(&self, result: &RelayResult) {
        let key = result.intent.key();
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(&key);
        inner.finished.insert(key, result.success);

        match (result.success, result.error) {
            (true, Some(ErrorKind::DuplicateRelay)) => inner.counters.duplicate += 1,
            (true, _) => inner.counters.confirmed += 1,
            (false, _) => inner.counters.failed += 1,
        }

        if inner.recent_capacity > 0 {
            if inner.recent.len() >= inner.recent_capacity {
                inner.recent.pop_front();
            }
            inner.recent.push_back(result.clone());
        }
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().await;
        let mut in_flight: Vec<InFlightRelay> = inner.in_flight.values().cloned().collect();
        in_flight.sort_by_key(|r| r.claimed_at);

        StateSnapshot {
            started_at: self.started_at,
            cursors: inner.cursors.iter().map(|(k, v)| (*k, *v)).collect(),
            in_flight,
            finished: inner.finished.len(),
            counters: inner.counters.clone(),
            recent: inner.recent.iter().rev().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};

    fn intent(log_index: u64) -> BridgeIntent {
        BridgeIntent {
            source_chain_id: 1,
            source_tx_hash: B256::repeat_byte(0x01),
            block_number: 10,
            log_index,
            from_address: Address::repeat_byte(0xaa),
            amount: U256::from(5u64),
            identifier: None,
        }
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic() {
        let state = BridgeState::new();
        assert_eq!(state.last_processed_block(1).await, None);
        assert!(state.advance_cursor(1, 100).await);
        assert!(!state.advance_cursor(1, 99).await);
        assert!(!state.advance_cursor(1, 100).await);
        assert!(state.advance_cursor(1, 101).await);
        assert_eq!(state.last_processed_block(1).await, Some(101));
        assert_eq!(state.last_processed_block(137).await, None);
    }

    #[tokio::test]
    async fn test_intent_claimed_once() {
        let state = BridgeState::new();
        let i = intent(0);
        assert!(state.begin_intent(&i, 137).await);
        assert!(!state.begin_intent(&i, 137).await);
        assert!(state.is_known(&i.key()).await);
        assert!(state.begin_intent(&intent(1), 137).await);
        assert_eq!(state.in_flight_count().await, 2);
    }

    #[tokio::test]
    async fn test_finished_intent_not_reclaimed() {
        let state = BridgeState::new();
        let i = intent(0);
        assert!(state.begin_intent(&i, 137).await);
        state
            .record_submitted(&i.key(), 7, B256::repeat_byte(0x77))
            .await;

        let snap = state.snapshot().await;
        assert_eq!(snap.in_flight[0].nonce, Some(7));

        let result = RelayResult::failed(i.clone(), 137, ErrorKind::SubmissionFailed, "reverted");
        state.record_result(&result).await;

        assert_eq!(state.in_flight_count().await, 0);
        assert!(!state.begin_intent(&i, 137).await);

        let snap = state.snapshot().await;
        assert_eq!(snap.finished, 1);
        assert_eq!(snap.counters.failed, 1);
        assert_eq!(snap.recent.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_results_bounded() {
        let state = BridgeState::with_limits(100, 3600, 2);
        for idx in 0..3 {
            let result = RelayResult::confirmed(intent(idx), 137, B256::ZERO, idx);
            state.record_result(&result).await;
        }
        let snap = state.snapshot().await;
        assert_eq!(snap.recent.len(), 2);
        // newest first
        assert_eq!(snap.recent[0].intent.log_index, 2);
        assert_eq!(snap.counters.confirmed, 3);
    }

    #[tokio::test]
    async fn test_duplicate_counted_separately() {
        let state = BridgeState::new();
        let result = RelayResult::failed(intent(0), 137, ErrorKind::DuplicateRelay, "used");
        state.record_result(&result).await;
        let snap = state.snapshot().await;
        assert_eq!(snap.counters.duplicate, 1);
        assert_eq!(snap.counters.confirmed, 0);
    }
}
