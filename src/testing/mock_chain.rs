//! In-memory EVM chain
//!
//! Behaves like a node fronting the AUDT token and bridge contracts:
//! - `mint` credits the recipient and emits `Transfer(0x0, recipient, amount)`
//! - `createNewTokens` mints the amount registered for the identifier and
//!   rejects an identifier it has already processed
//! - stale nonces are rejected with "nonce too low"
//! - a nonce above the pending count waits in a future queue and is only mined
//!   once the nonces below it are filled
//! - resending a transaction the mock already holds returns its hash

use alloy::primitives::{keccak256, Address, LogData, TxHash, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::chain::{ChainClient, TxParams};
use crate::contracts::{AuditToken, Bridge};
use crate::error::BridgeError;
use crate::types::{ChainEndpoint, LogFilter, RelayCall, RelayReceipt};

pub const MOCK_TOKEN: Address = Address::repeat_byte(0x70);
pub const MOCK_BRIDGE: Address = Address::repeat_byte(0xb0);
pub const MOCK_SIGNER: Address = Address::repeat_byte(0x5e);

/// A transaction the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub tx_hash: TxHash,
    pub call: RelayCall,
    pub params: TxParams,
    pub block_number: u64,
}

/// Accepted with a nonce above the pending count; not mined yet.
#[derive(Debug, Clone)]
struct QueuedTx {
    tx_hash: TxHash,
    call: RelayCall,
    params: TxParams,
}

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<Log>,
    tx_counter: u64,
    pending_nonce: u64,
    fail_nonce_queries: bool,
    failing_reads: u32,
    reconnects: u32,
    log_queries: Vec<(u64, u64)>,
    submit_errors: VecDeque<BridgeError>,
    lost_responses: VecDeque<BridgeError>,
    queued: BTreeMap<u64, QueuedTx>,
    preflight_errors: VecDeque<BridgeError>,
    gas_price_errors: VecDeque<BridgeError>,
    preflights: u32,
    submitted: Vec<SubmittedTx>,
    registered: HashMap<B256, (Address, U256)>,
    processed_identifiers: HashSet<B256>,
    reject_repeated_mints: bool,
    minted: HashSet<(Address, U256)>,
    balances: HashMap<Address, U256>,
    receipts: HashMap<TxHash, RelayReceipt>,
    hold_receipts: bool,
    revert_on_chain: bool,
    gas_price: u128,
}

pub struct MockChain {
    endpoint: ChainEndpoint,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64, name: &str) -> Self {
        Self {
            endpoint: ChainEndpoint {
                name: name.to_string(),
                chain_id,
                rpc_urls: vec![format!("http://{}.mock", name)],
                signing_rpc_urls: vec![format!("http://{}.mock", name)],
                token_address: MOCK_TOKEN,
                bridge_address: MOCK_BRIDGE,
            },
            state: Mutex::new(MockState {
                gas_price: 1_000_000_000,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // Ignore poisoning from a panicked test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---------------------------------------------------------------------
    // Chain history
    // ---------------------------------------------------------------------

    pub fn head(&self) -> u64 {
        self.lock().head
    }

    pub fn set_head(&self, block: u64) {
        self.lock().head = block;
    }

    /// Append an `AmountReceived` log on the bridge contract at `block`.
    pub fn emit_amount_received(
        &self,
        block: u64,
        user: Address,
        amount: U256,
        identifier: B256,
    ) -> TxHash {
        let event = Bridge::AmountReceived {
            user,
            amount,
            identifier,
        };
        self.push_log(block, MOCK_BRIDGE, event.encode_log_data())
    }

    /// Append a `Transfer` log on the token contract at `block`.
    pub fn emit_transfer(&self, block: u64, from: Address, to: Address, value: U256) -> TxHash {
        let event = AuditToken::Transfer { from, to, value };
        self.push_log(block, MOCK_TOKEN, event.encode_log_data())
    }

    /// Append a log with arbitrary topics and data, e.g. a malformed event.
    pub fn emit_raw(&self, block: u64, address: Address, topics: Vec<B256>, data: Vec<u8>) -> TxHash {
        self.push_log(block, address, LogData::new_unchecked(topics, data.into()))
    }

    /// Mark every log of `tx_hash` as removed by a reorg.
    pub fn mark_removed(&self, tx_hash: TxHash) {
        let mut state = self.lock();
        for log in state.logs.iter_mut() {
            if log.transaction_hash == Some(tx_hash) {
                log.removed = true;
            }
        }
    }

    fn push_log(&self, block: u64, address: Address, data: LogData) -> TxHash {
        let mut state = self.lock();
        Self::push_log_locked(&mut state, self.endpoint.chain_id, block, address, data)
    }

    fn next_tx_hash(state: &mut MockState, chain_id: u64) -> TxHash {
        state.tx_counter += 1;
        keccak256(format!("{}:{}", chain_id, state.tx_counter))
    }

    fn push_log_locked(
        state: &mut MockState,
        chain_id: u64,
        block: u64,
        address: Address,
        data: LogData,
    ) -> TxHash {
        let tx_hash = Self::next_tx_hash(state, chain_id);
        Self::push_log_with_hash(state, chain_id, block, address, data, tx_hash);
        tx_hash
    }

    fn push_log_with_hash(
        state: &mut MockState,
        chain_id: u64,
        block: u64,
        address: Address,
        data: LogData,
        tx_hash: TxHash,
    ) {
        let log_index = state
            .logs
            .iter()
            .filter(|l| l.block_number == Some(block))
            .count() as u64;

        state.logs.push(Log {
            inner: alloy::primitives::Log { address, data },
            block_hash: Some(keccak256(format!("{}:block:{}", chain_id, block))),
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(tx_hash),
            transaction_index: Some(0),
            log_index: Some(log_index),
            removed: false,
        });
        state.head = state.head.max(block);
    }

    /// Block ranges passed to `logs`, in call order.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.lock().log_queries.clone()
    }

    // ---------------------------------------------------------------------
    // Failure injection
    // ---------------------------------------------------------------------

    /// Fail the next `count` calls to `block_number` or `logs`.
    pub fn fail_next_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    /// Number of times a caller asked to re-establish the connection
    pub fn reconnect_count(&self) -> u32 {
        self.lock().reconnects
    }

    pub fn fail_nonce_queries(&self, fail: bool) {
        self.lock().fail_nonce_queries = fail;
    }

    /// Queue an error returned by the next `submit` call, before any checks.
    pub fn push_submit_error(&self, error: BridgeError) {
        self.lock().submit_errors.push_back(error);
    }

    /// Accept the next successful `submit` but answer it with `error`, as a
    /// transport failure after the node took the transaction would.
    pub fn lose_next_response(&self, error: BridgeError) {
        self.lock().lost_responses.push_back(error);
    }

    /// Queue an error returned by the next `preflight` call, before any checks.
    pub fn push_gas_price_error(&self, error: BridgeError) {
        self.lock().gas_price_errors.push_back(error);
    }

    pub fn push_preflight_error(&self, error: BridgeError) {
        self.lock().preflight_errors.push_back(error);
    }

    pub fn preflight_count(&self) -> u32 {
        self.lock().preflights
    }

    // ---------------------------------------------------------------------
    // Account and contract state
    // ---------------------------------------------------------------------

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.lock().pending_nonce = nonce;
    }

    pub fn pending_nonce(&self) -> u64 {
        self.lock().pending_nonce
    }

    /// Record what the bridge holds for `identifier`, as the counterpart
    /// chain's lock would.
    pub fn register_identifier(&self, identifier: B256, user: Address, amount: U256) {
        self.lock().registered.insert(identifier, (user, amount));
    }

    /// Reject a second `mint` with the same recipient and amount.
    pub fn reject_repeated_mints(&self, reject: bool) {
        self.lock().reject_repeated_mints = reject;
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.lock().balances.insert(account, balance);
    }

    pub fn balance(&self, account: Address) -> U256 {
        self.lock().balances.get(&account).copied().unwrap_or_default()
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.lock().gas_price = gas_price;
    }

    /// Keep receipts unavailable until released.
    pub fn hold_receipts(&self, hold: bool) {
        self.lock().hold_receipts = hold;
    }

    /// Accepted transactions revert when mined.
    pub fn revert_on_chain(&self, revert: bool) {
        self.lock().revert_on_chain = revert;
    }

    /// Mined transactions, in nonce order.
    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.lock().submitted.clone()
    }

    /// Nonces of accepted transactions stuck behind a gap.
    pub fn queued_nonces(&self) -> Vec<u64> {
        self.lock().queued.keys().copied().collect()
    }

    fn take_read_failure(state: &mut MockState, chain_id: u64) -> Result<(), BridgeError> {
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(BridgeError::connection(chain_id, "connection reset by peer"));
        }
        Ok(())
    }

    fn credit(state: &mut MockState, account: Address, amount: U256) {
        let balance = state.balances.entry(account).or_default();
        *balance += amount;
    }

    /// Contract-side checks shared by `preflight` and `submit`. Returns the
    /// account and amount the call would mint.
    fn check(state: &MockState, call: &RelayCall) -> Result<(Address, U256), BridgeError> {
        match call {
            RelayCall::Mint { recipient, amount } => {
                if state.reject_repeated_mints && state.minted.contains(&(*recipient, *amount)) {
                    return Err(BridgeError::DuplicateRelay(
                        "execution reverted: already minted".to_string(),
                    ));
                }
                Ok((*recipient, *amount))
            }
            RelayCall::CreateNewTokens { identifier } => {
                if state.processed_identifiers.contains(identifier) {
                    return Err(BridgeError::DuplicateRelay(
                        "execution reverted: identifier already processed".to_string(),
                    ));
                }
                state.registered.get(identifier).copied().ok_or_else(|| {
                    BridgeError::SubmissionFailed(
                        "execution reverted: unknown identifier".to_string(),
                    )
                })
            }
        }
    }

    fn execute(state: &mut MockState, call: &RelayCall) -> Result<(Address, U256), BridgeError> {
        let minted = Self::check(state, call)?;
        match call {
            RelayCall::Mint { recipient, amount } => {
                state.minted.insert((*recipient, *amount));
            }
            RelayCall::CreateNewTokens { identifier } => {
                state.processed_identifiers.insert(*identifier);
            }
        }
        Ok(minted)
    }

    /// Hash of an identical transaction already mined or queued.
    fn find_known(state: &MockState, call: &RelayCall, params: &TxParams) -> Option<TxHash> {
        let same = |c: &RelayCall, p: &TxParams| {
            c == call && p.nonce == params.nonce && p.gas_price == params.gas_price
        };
        state
            .submitted
            .iter()
            .find(|tx| same(&tx.call, &tx.params))
            .map(|tx| tx.tx_hash)
            .or_else(|| {
                state
                    .queued
                    .get(&params.nonce)
                    .filter(|tx| same(&tx.call, &tx.params))
                    .map(|tx| tx.tx_hash)
            })
    }

    /// Mine `call` at the pending nonce in a new block.
    fn mine(
        state: &mut MockState,
        chain_id: u64,
        call: &RelayCall,
        params: TxParams,
        tx_hash: Option<TxHash>,
    ) -> Result<TxHash, BridgeError> {
        let block = state.head + 1;
        let revert = state.revert_on_chain;
        let minted = if revert {
            Self::check(state, call)?
        } else {
            Self::execute(state, call)?
        };

        let tx_hash = tx_hash.unwrap_or_else(|| Self::next_tx_hash(state, chain_id));
        if !revert {
            let transfer = AuditToken::Transfer {
                from: Address::ZERO,
                to: minted.0,
                value: minted.1,
            };
            Self::credit(state, minted.0, minted.1);
            Self::push_log_with_hash(
                state,
                chain_id,
                block,
                MOCK_TOKEN,
                transfer.encode_log_data(),
                tx_hash,
            );
        }
        Self::record_mined(state, tx_hash, call, params, block, !revert);
        Ok(tx_hash)
    }

    fn record_mined(
        state: &mut MockState,
        tx_hash: TxHash,
        call: &RelayCall,
        params: TxParams,
        block: u64,
        success: bool,
    ) {
        state.head = block;
        state.pending_nonce = params.nonce + 1;
        state.submitted.push(SubmittedTx {
            tx_hash,
            call: call.clone(),
            params,
            block_number: block,
        });
        state.receipts.insert(
            tx_hash,
            RelayReceipt {
                tx_hash,
                block_number: Some(block),
                success,
            },
        );
    }

    /// Mine queued transactions whose nonce is now next.
    fn mine_queued(state: &mut MockState, chain_id: u64) {
        loop {
            let next = state.pending_nonce;
            let Some(tx) = state.queued.remove(&next) else {
                break;
            };
            if Self::mine(state, chain_id, &tx.call, tx.params, Some(tx.tx_hash)).is_err() {
                // Contract rejection of an already accepted transaction: it
                // still consumes the nonce and mines as a revert
                let block = state.head + 1;
                Self::record_mined(state, tx.tx_hash, &tx.call, tx.params, block, false);
            }
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    fn signer_address(&self) -> Address {
        MOCK_SIGNER
    }

    async fn block_number(&self) -> Result<u64, BridgeError> {
        let mut state = self.lock();
        Self::take_read_failure(&mut state, self.endpoint.chain_id)?;
        Ok(state.head)
    }

    async fn logs(
        &self,
        filter: LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, BridgeError> {
        let mut state = self.lock();
        Self::take_read_failure(&mut state, self.endpoint.chain_id)?;
        state.log_queries.push((from_block, to_block));

        let mut logs: Vec<Log> = state
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                log.address() == filter.address
                    && log.topics().first() == Some(&filter.topic)
                    && block >= from_block
                    && block <= to_block
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn pending_transaction_count(&self, owner: Address) -> Result<u64, BridgeError> {
        let state = self.lock();
        if state.fail_nonce_queries {
            return Err(BridgeError::connection(
                self.endpoint.chain_id,
                "eth_getTransactionCount timed out",
            ));
        }
        if owner != MOCK_SIGNER {
            return Ok(0);
        }
        Ok(state.pending_nonce)
    }

    async fn gas_price(&self) -> Result<u128, BridgeError> {
        let mut state = self.lock();
        match state.gas_price_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(state.gas_price),
        }
    }

    async fn preflight(&self, call: &RelayCall) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.preflights += 1;
        if let Some(err) = state.preflight_errors.pop_front() {
            return Err(err);
        }
        Self::check(&state, call).map(|_| ())
    }

    async fn submit(&self, call: &RelayCall, params: TxParams) -> Result<TxHash, BridgeError> {
        let chain_id = self.endpoint.chain_id;
        let mut state = self.lock();

        if let Some(err) = state.submit_errors.pop_front() {
            return Err(err);
        }
        if let Some(known) = Self::find_known(&state, call, &params) {
            return Ok(known);
        }
        if params.nonce < state.pending_nonce {
            return Err(BridgeError::SubmissionFailed(format!(
                "nonce too low: next nonce {}, tx nonce {}",
                state.pending_nonce, params.nonce
            )));
        }

        let tx_hash = if params.nonce > state.pending_nonce {
            let tx_hash = Self::next_tx_hash(&mut state, chain_id);
            state.queued.insert(
                params.nonce,
                QueuedTx {
                    tx_hash,
                    call: call.clone(),
                    params,
                },
            );
            tx_hash
        } else {
            let tx_hash = Self::mine(&mut state, chain_id, call, params, None)?;
            Self::mine_queued(&mut state, chain_id);
            tx_hash
        };

        if let Some(err) = state.lost_responses.pop_front() {
            return Err(err);
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<RelayReceipt>, BridgeError> {
        let state = self.lock();
        if state.hold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).copied())
    }

    async fn token_balance(&self, account: Address) -> Result<U256, BridgeError> {
        Ok(self.balance(account))
    }

    async fn reconnect(&self) -> Result<(), BridgeError> {
        self.lock().reconnects += 1;
        Ok(())
    }
}
