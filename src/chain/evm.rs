//! alloy-backed [`ChainClient`] over HTTP JSON-RPC

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{ChainClient, TxParams};
use crate::contracts::AuditToken;
use crate::error::BridgeError;
use crate::retry::{classify_error, ErrorClass};
use crate::rpc_fallback;
use crate::types::{ChainEndpoint, LogFilter, RelayCall, RelayReceipt};

/// EVM chain connection: read provider for polling, a second provider for
/// raw relay transactions signed locally
pub struct EvmChain {
    endpoint: ChainEndpoint,
    reader: RwLock<ReadConnection>,
    sender: RootProvider<Http<Client>>,
    wallet: EthereumWallet,
    signer_address: Address,
}

struct ReadConnection {
    provider: RootProvider<Http<Client>>,
    /// Index into `endpoint.rpc_urls`
    url_index: usize,
}

impl EvmChain {
    /// Connect both handles. The first URL of each list that answers with the
    /// configured chain id wins.
    pub async fn connect(endpoint: ChainEndpoint, private_key: &str) -> Result<Self, BridgeError> {
        let chain_id = endpoint.chain_id;
        let key: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| BridgeError::connection(chain_id, format!("invalid private key: {}", e)))?;
        let signer_address = key.address();
        let wallet = EthereumWallet::from(key);

        let (reader, read_url) = rpc_fallback::connect_first(&endpoint.rpc_urls, chain_id).await?;
        let (sender, signing_url) =
            rpc_fallback::connect_first(&endpoint.signing_rpc_urls, chain_id).await?;

        info!(
            chain = %endpoint.name,
            chain_id,
            read_url = %read_url,
            signing_url = %signing_url,
            "EVM chain connection established"
        );

        let url_index = endpoint
            .rpc_urls
            .iter()
            .position(|url| *url == read_url)
            .unwrap_or_default();

        Ok(Self {
            endpoint,
            reader: RwLock::new(ReadConnection {
                provider: reader,
                url_index,
            }),
            sender,
            wallet,
            signer_address,
        })
    }

    async fn reader(&self) -> RootProvider<Http<Client>> {
        self.reader.read().await.provider.clone()
    }

    fn conn_err(&self, e: impl std::fmt::Display) -> BridgeError {
        BridgeError::connection(self.endpoint.chain_id, e)
    }

    /// Map a node rejection to the relay error taxonomy.
    fn submission_err(&self, e: impl std::fmt::Display) -> BridgeError {
        let message = e.to_string();
        match classify_error(&message) {
            ErrorClass::Duplicate => BridgeError::DuplicateRelay(message),
            ErrorClass::Transient => self.conn_err(message),
            _ => BridgeError::SubmissionFailed(message),
        }
    }
}

#[async_trait]
impl ChainClient for EvmChain {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    fn signer_address(&self) -> Address {
        self.signer_address
    }

    async fn block_number(&self) -> Result<u64, BridgeError> {
        let reader = self.reader().await;
        reader
            .get_block_number()
            .await
            .map_err(|e| self.conn_err(e))
    }

    async fn logs(
        &self,
        filter: LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, BridgeError> {
        let query = Filter::new()
            .address(filter.address)
            .event_signature(filter.topic)
            .from_block(from_block)
            .to_block(to_block);

        let reader = self.reader().await;
        reader.get_logs(&query).await.map_err(|e| {
            self.conn_err(format!(
                "failed to get logs from block {} to {}: {}",
                from_block, to_block, e
            ))
        })
    }

    async fn pending_transaction_count(&self, owner: Address) -> Result<u64, BridgeError> {
        let reader = self.reader().await;
        reader
            .get_transaction_count(owner)
            .pending()
            .await
            .map_err(|e| self.conn_err(e))
    }

    async fn gas_price(&self) -> Result<u128, BridgeError> {
        let reader = self.reader().await;
        reader
            .get_gas_price()
            .await
            .map_err(|e| self.conn_err(e))
    }

    async fn preflight(&self, call: &RelayCall) -> Result<(), BridgeError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer_address)
            .with_to(call.target(&self.endpoint))
            .with_input(call.calldata());

        let reader = self.reader().await;
        reader
            .call(&tx)
            .await
            .map(|_| ())
            .map_err(|e| self.submission_err(e))
    }

    async fn submit(&self, call: &RelayCall, params: TxParams) -> Result<TxHash, BridgeError> {
        let tx = TransactionRequest::default()
            .with_from(self.signer_address)
            .with_to(call.target(&self.endpoint))
            .with_input(call.calldata())
            .with_nonce(params.nonce)
            .with_gas_limit(params.gas_limit)
            .with_gas_price(params.gas_price)
            .with_chain_id(self.endpoint.chain_id);

        debug!(
            chain_id = self.endpoint.chain_id,
            method = call.name(),
            nonce = params.nonce,
            gas_limit = params.gas_limit,
            gas_price = params.gas_price,
            "Sending relay transaction"
        );

        // Signed here so the hash is known even if the node's answer is lost
        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| BridgeError::SubmissionFailed(format!("failed to sign transaction: {}", e)))?;
        let tx_hash = *envelope.tx_hash();

        match self
            .sender
            .send_raw_transaction(&envelope.encoded_2718())
            .await
        {
            Ok(_) => Ok(tx_hash),
            Err(e) => {
                let message = e.to_string();
                if classify_error(&message) == ErrorClass::AlreadyKnown {
                    debug!(
                        chain_id = self.endpoint.chain_id,
                        tx_hash = %tx_hash,
                        "Node already holds this transaction"
                    );
                    return Ok(tx_hash);
                }
                Err(self.submission_err(message))
            }
        }
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<RelayReceipt>, BridgeError> {
        let reader = self.reader().await;
        let receipt = reader
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.conn_err(e))?;

        Ok(receipt.map(|r| RelayReceipt {
            tx_hash,
            block_number: r.block_number,
            success: r.status(),
        }))
    }

    async fn token_balance(&self, account: Address) -> Result<U256, BridgeError> {
        let reader = self.reader().await;
        let token = AuditToken::new(self.endpoint.token_address, &reader);
        let balance = token
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| self.conn_err(e))?;
        Ok(balance._0)
    }

    async fn reconnect(&self) -> Result<(), BridgeError> {
        let urls = &self.endpoint.rpc_urls;
        let mut conn = self.reader.write().await;
        let order = rpc_fallback::rotation_order(urls, conn.url_index);

        match rpc_fallback::connect_first(&order, self.endpoint.chain_id).await {
            Ok((provider, url)) => {
                let url_index = urls.iter().position(|u| *u == url).unwrap_or_default();
                if url_index != conn.url_index {
                    info!(
                        chain = %self.endpoint.name,
                        read_url = %url,
                        "Switched read RPC endpoint"
                    );
                }
                *conn = ReadConnection {
                    provider,
                    url_index,
                };
                Ok(())
            }
            Err(e) => {
                warn!(
                    chain = %self.endpoint.name,
                    error = %e,
                    "No read RPC endpoint reachable, keeping current connection"
                );
                Err(e)
            }
        }
    }
}
