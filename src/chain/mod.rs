//! Chain connection management
//!
//! Every chain the relayer touches is reached through a [`ChainClient`]: one
//! read connection for log polling and queries, one signing connection for
//! relay transactions. [`ChainSet`] owns the connected clients for the process.

use alloy::primitives::{Address, TxHash, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::BridgeError;
use crate::types::{ChainEndpoint, LogFilter, RelayCall, RelayReceipt};

pub mod evm;

pub use evm::EvmChain;

/// Transaction parameters fixed by the executor before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParams {
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// Read and write access to one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &ChainEndpoint;

    fn chain_id(&self) -> u64 {
        self.endpoint().chain_id
    }

    /// Address of the relayer's signing account on this chain.
    fn signer_address(&self) -> Address;

    async fn block_number(&self) -> Result<u64, BridgeError>;

    /// Logs matching `filter` in `[from_block, to_block]`, in block and log-index order.
    async fn logs(
        &self,
        filter: LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, BridgeError>;

    /// Transaction count of `owner` including pending transactions.
    async fn pending_transaction_count(&self, owner: Address) -> Result<u64, BridgeError>;

    async fn gas_price(&self) -> Result<u128, BridgeError>;

    /// Simulate `call` from the signer with `eth_call`. Contract rejections
    /// (duplicate identifier, missing minter role) surface here, before a
    /// nonce is spent.
    async fn preflight(&self, call: &RelayCall) -> Result<(), BridgeError>;

    /// Sign and send `call`. Returns once the node has accepted the transaction.
    /// Resending a transaction the node already holds (same nonce, call and
    /// gas price) returns the hash of the held transaction.
    async fn submit(&self, call: &RelayCall, params: TxParams) -> Result<TxHash, BridgeError>;

    /// `None` while the transaction is not yet mined.
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<RelayReceipt>, BridgeError>;

    /// AUDT balance of `account` on this chain.
    async fn token_balance(&self, account: Address) -> Result<U256, BridgeError>;

    /// Re-establish the read connection after RPC failures, moving to the
    /// next configured URL that answers with this chain's id.
    async fn reconnect(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// All connected chains, keyed by chain id.
#[derive(Clone, Default)]
pub struct ChainSet {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainSet {
    /// Connect to every endpoint. Fails if any chain is unreachable; the
    /// process never starts partially connected.
    pub async fn connect(
        endpoints: &[ChainEndpoint],
        private_key: &str,
    ) -> Result<Self, BridgeError> {
        let mut set = ChainSet::default();
        for endpoint in endpoints {
            let chain = EvmChain::connect(endpoint.clone(), private_key).await?;
            info!(
                chain = %endpoint.name,
                chain_id = endpoint.chain_id,
                signer = %chain.signer_address(),
                "Chain connected"
            );
            set.insert(Arc::new(chain));
        }
        Ok(set)
    }

    pub fn from_clients(clients: Vec<Arc<dyn ChainClient>>) -> Self {
        let mut set = ChainSet::default();
        for client in clients {
            set.insert(client);
        }
        set
    }

    pub fn insert(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain_id(), client);
    }

    pub fn get(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>, BridgeError> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or(BridgeError::UnknownChain(chain_id))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<dyn ChainClient>> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
