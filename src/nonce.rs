//! Per-chain nonce tracking for the relayer's signing account
//!
//! The tracker hands out nonces without waiting for confirmations so several
//! relays can be in the mempool at once. Every reservation re-reads the pending
//! transaction count and only ever moves the local counter upward.
//!
//! A nonce whose transaction never reached the node is handed back with
//! [`NonceTracker::release`] and reused by the next reservation, so a rejected
//! submission does not leave a gap that later transactions queue behind.

use alloy::primitives::Address;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::ChainSet;
use crate::error::BridgeError;
use crate::metrics;

#[derive(Debug)]
struct NonceState {
    owner: Address,
    next_nonce: Option<u64>,
    /// Released nonces below `next_nonce`, reused lowest first
    released: BTreeSet<u64>,
}

pub struct NonceTracker {
    chains: ChainSet,
    states: HashMap<u64, Mutex<NonceState>>,
}

impl NonceTracker {
    pub fn new(chains: ChainSet) -> Self {
        let states = chains
            .clients()
            .map(|client| {
                (
                    client.chain_id(),
                    Mutex::new(NonceState {
                        owner: client.signer_address(),
                        next_nonce: None,
                        released: BTreeSet::new(),
                    }),
                )
            })
            .collect();
        Self { chains, states }
    }

    /// Return the nonce for the next transaction on `chain_id` and advance the
    /// counter. Two calls never return the same value for the same chain.
    pub async fn reserve_nonce(&self, chain_id: u64) -> Result<u64, BridgeError> {
        let client = self.chains.get(chain_id)?;
        let state = self
            .states
            .get(&chain_id)
            .ok_or(BridgeError::UnknownChain(chain_id))?;

        // Fetched before taking the lock so a slow node does not serialize
        // reservations behind it.
        let fetched = client
            .pending_transaction_count(client.signer_address())
            .await;
        let onchain_count = fetched.as_ref().ok().copied();

        let mut state = state.lock().await;
        let nonce = match (state.next_nonce, fetched) {
            (None, Ok(onchain)) => {
                info!(
                    chain_id,
                    owner = %state.owner,
                    nonce = onchain,
                    "Nonce tracker initialized from chain"
                );
                onchain
            }
            (None, Err(e)) => return Err(e),
            (Some(local), Ok(onchain)) if onchain > local => {
                info!(
                    chain_id,
                    local,
                    onchain,
                    "Pending count ahead of local nonce, resyncing upward"
                );
                onchain
            }
            (Some(local), Ok(_)) => local,
            (Some(local), Err(e)) => {
                warn!(
                    chain_id,
                    nonce = local,
                    error = %e,
                    "Could not refresh pending count, using local nonce"
                );
                local
            }
        };

        // Released nonces the chain has since moved past are gone
        if let Some(onchain) = onchain_count {
            state.released = state.released.split_off(&onchain);
        }
        if let Some(reused) = state.released.pop_first() {
            state.next_nonce = Some(nonce);
            debug!(chain_id, nonce = reused, "Released nonce reserved again");
            return Ok(reused);
        }

        state.next_nonce = Some(nonce + 1);
        metrics::set_next_nonce(&client.endpoint().name, nonce + 1);
        debug!(chain_id, nonce, "Nonce reserved");
        Ok(nonce)
    }

    /// Hand back a reserved nonce whose transaction never reached the node.
    ///
    /// Only call this when the node definitely rejected every attempt; a
    /// nonce that may sit in the mempool must stay consumed.
    pub async fn release(&self, chain_id: u64, nonce: u64) {
        let Some(state) = self.states.get(&chain_id) else {
            return;
        };
        let mut state = state.lock().await;

        match state.next_nonce {
            Some(next) if nonce + 1 == next => {
                // Roll back over any released nonces directly below as well
                let mut next = nonce;
                while next > 0 && state.released.remove(&(next - 1)) {
                    next -= 1;
                }
                state.next_nonce = Some(next);
                if let Ok(client) = self.chains.get(chain_id) {
                    metrics::set_next_nonce(&client.endpoint().name, next);
                }
                debug!(chain_id, nonce, next_nonce = next, "Nonce released");
            }
            Some(next) if nonce < next => {
                state.released.insert(nonce);
                debug!(chain_id, nonce, "Nonce released below later reservations");
            }
            _ => {
                warn!(chain_id, nonce, "Ignoring release of a nonce that was never reserved");
            }
        }
    }

    /// The value the next reservation would start from, if initialized.
    pub async fn next_nonce(&self, chain_id: u64) -> Option<u64> {
        let state = self.states.get(&chain_id)?;
        state.lock().await.next_nonce
    }

    /// Snapshot of every initialized counter, for status reporting.
    pub async fn snapshot(&self) -> HashMap<u64, u64> {
        let mut out = HashMap::new();
        for (chain_id, state) in &self.states {
            if let Some(next) = state.lock().await.next_nonce {
                out.insert(*chain_id, next);
            }
        }
        out
    }
}
