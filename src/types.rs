//! Common types for cross-chain relaying

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::contracts::{AuditToken, Bridge};
use crate::error::{BridgeError, ErrorKind};

/// Static description of one chain the relayer talks to. Immutable after startup.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    /// Human-readable name ("ethereum", "polygon")
    pub name: String,
    pub chain_id: u64,
    /// Read URLs: primary followed by fallbacks
    pub rpc_urls: Vec<String>,
    /// Signing URLs: primary followed by fallbacks
    pub signing_rpc_urls: Vec<String>,
    pub token_address: Address,
    pub bridge_address: Address,
}

/// Which source event a route watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchKind {
    /// `Bridge.AmountReceived(user, amount, identifier)` on the bridge contract
    AmountReceived,
    /// `AuditToken.Transfer(from, to, value)` on the token contract
    Transfer,
}

impl WatchKind {
    pub fn contract(&self, endpoint: &ChainEndpoint) -> Address {
        match self {
            WatchKind::AmountReceived => endpoint.bridge_address,
            WatchKind::Transfer => endpoint.token_address,
        }
    }

    pub fn topic(&self) -> B256 {
        match self {
            WatchKind::AmountReceived => Bridge::AmountReceived::SIGNATURE_HASH,
            WatchKind::Transfer => AuditToken::Transfer::SIGNATURE_HASH,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchKind::AmountReceived => "AmountReceived",
            WatchKind::Transfer => "Transfer",
        }
    }
}

/// Contract address + event signature used to query logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic: B256,
}

/// A detected source-chain event awaiting its mirrored action on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeIntent {
    pub source_chain_id: u64,
    pub source_tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
    pub from_address: Address,
    /// Smallest token unit
    pub amount: U256,
    /// Correlation value from `AmountReceived`; `None` for plain transfers
    pub identifier: Option<B256>,
}

impl BridgeIntent {
    pub fn key(&self) -> IntentKey {
        IntentKey {
            chain_id: self.source_chain_id,
            tx_hash: self.source_tx_hash,
            log_index: self.log_index,
        }
    }
}

/// Identity of a source event within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IntentKey {
    pub chain_id: u64,
    pub tx_hash: TxHash,
    pub log_index: u64,
}

impl fmt::Display for IntentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// What a route does on the destination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayAction {
    /// `Bridge.createNewTokens(identifier)` on the destination bridge
    CreateNewTokens,
    /// `AuditToken.mint(from, amount)` on the destination token
    Mint,
}

impl RelayAction {
    pub fn build_call(&self, intent: &BridgeIntent) -> Result<RelayCall, BridgeError> {
        match self {
            RelayAction::CreateNewTokens => {
                let identifier = intent.identifier.ok_or_else(|| {
                    BridgeError::Decode(format!(
                        "intent {} has no correlation identifier",
                        intent.key()
                    ))
                })?;
                Ok(RelayCall::CreateNewTokens { identifier })
            }
            RelayAction::Mint => Ok(RelayCall::Mint {
                recipient: intent.from_address,
                amount: intent.amount,
            }),
        }
    }
}

/// A concrete destination-chain contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCall {
    Mint { recipient: Address, amount: U256 },
    CreateNewTokens { identifier: B256 },
}

impl RelayCall {
    /// Contract the call is sent to on the destination chain.
    pub fn target(&self, endpoint: &ChainEndpoint) -> Address {
        match self {
            RelayCall::Mint { .. } => endpoint.token_address,
            RelayCall::CreateNewTokens { .. } => endpoint.bridge_address,
        }
    }

    pub fn calldata(&self) -> Bytes {
        match self {
            RelayCall::Mint { recipient, amount } => AuditToken::mintCall {
                recipient: *recipient,
                amount: *amount,
            }
            .abi_encode()
            .into(),
            RelayCall::CreateNewTokens { identifier } => Bridge::createNewTokensCall {
                identifier: *identifier,
            }
            .abi_encode()
            .into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayCall::Mint { .. } => "mint",
            RelayCall::CreateNewTokens { .. } => "createNewTokens",
        }
    }
}

/// Mined transaction outcome as seen by the relayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// Relay lifecycle: Submitted -> Confirmed | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Submitted,
    Confirmed,
    Failed,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Submitted => "submitted",
            RelayStatus::Confirmed => "confirmed",
            RelayStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final outcome of relaying one intent.
#[derive(Debug, Clone, Serialize)]
pub struct RelayResult {
    pub intent: BridgeIntent,
    pub destination_chain_id: u64,
    pub destination_tx_hash: Option<TxHash>,
    pub nonce: Option<u64>,
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
    pub finalized_at: DateTime<Utc>,
}

impl RelayResult {
    pub fn confirmed(
        intent: BridgeIntent,
        destination_chain_id: u64,
        tx_hash: TxHash,
        nonce: u64,
    ) -> Self {
        Self {
            intent,
            destination_chain_id,
            destination_tx_hash: Some(tx_hash),
            nonce: Some(nonce),
            success: true,
            error: None,
            message: None,
            finalized_at: Utc::now(),
        }
    }

    pub fn failed(
        intent: BridgeIntent,
        destination_chain_id: u64,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            intent,
            destination_chain_id,
            destination_tx_hash: None,
            nonce: None,
            success: kind == ErrorKind::DuplicateRelay,
            error: Some(kind),
            message: Some(message.into()),
            finalized_at: Utc::now(),
        }
    }

    pub fn with_submission(mut self, tx_hash: TxHash, nonce: u64) -> Self {
        self.destination_tx_hash = Some(tx_hash);
        self.nonce = Some(nonce);
        self
    }

    pub fn status(&self) -> RelayStatus {
        if self.success {
            RelayStatus::Confirmed
        } else {
            RelayStatus::Failed
        }
    }
}
