//! Relayer configuration from environment variables
//!
//! A `.env` file is loaded first when present. Every required value must be
//! set; the process refuses to start otherwise.

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::executor::{ExecutorConfig, DEFAULT_GAS_LIMIT};
use crate::listener::{ListenerConfig, StartBlock};
use crate::retry::RetryConfig;
use crate::rpc_fallback::{is_http_url, parse_rpc_urls};
use crate::types::ChainEndpoint;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub ethereum: ChainConfig,
    pub polygon: ChainConfig,
    pub relayer: RelayerConfig,
}

/// Per-chain configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    /// Read URLs: primary followed by fallbacks
    pub rpc_urls: Vec<String>,
    /// Signing URLs; the read URLs when not set
    pub signing_rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub token_address: String,
    pub bridge_address: String,
    /// `None` starts at the chain head
    pub start_block: Option<u64>,
    /// Blocks behind head treated as final
    pub confirmations: u64,
    /// Only relay `Transfer`s sent to this address (polygon route)
    pub transfer_recipient: Option<String>,
}

/// Relayer-wide settings
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
    pub gas_limit: u64,
    pub poll_interval_ms: u64,
    pub max_block_range: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_timeout_secs: u64,
    pub max_reconnect_attempts: u32,
    pub api_port: u16,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .field("gas_limit", &self.gas_limit)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_block_range", &self.max_block_range)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("receipt_poll_interval_ms", &self.receipt_poll_interval_ms)
            .field("receipt_timeout_secs", &self.receipt_timeout_secs)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("api_port", &self.api_port)
            .finish()
    }
}

/// Default functions
fn default_confirmations() -> u64 {
    0
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_retry_max_delay() -> u64 {
    60_000
}

fn default_receipt_poll_interval() -> u64 {
    2000
}

fn default_receipt_timeout() -> u64 {
    300
}

fn default_api_port() -> u16 {
    9090
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

/// Parse `name` if set, `default` if unset. A set but unparseable value is an
/// error rather than a silent fallback.
fn optional<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            eyre!(
                "{} must be a valid {}, got '{}'",
                name,
                std::any::type_name::<T>(),
                value
            )
        }),
        Err(_) => Ok(default),
    }
}

fn is_hex_address(value: &str) -> bool {
    value.len() == 42 && value.starts_with("0x")
}

impl ChainConfig {
    /// Load `{PREFIX}_*` variables for one chain
    fn from_env(prefix: &str, name: &str) -> Result<Self> {
        let rpc_var = format!("{}_RPC_URL", prefix);
        let rpc_urls = parse_rpc_urls(&required(&rpc_var)?);
        if rpc_urls.is_empty() {
            return Err(eyre!("{} cannot be empty", rpc_var));
        }

        let signing_rpc_urls = env::var(format!("{}_SIGNING_RPC_URL", prefix))
            .map(|raw| parse_rpc_urls(&raw))
            .ok()
            .filter(|urls| !urls.is_empty())
            .unwrap_or_else(|| rpc_urls.clone());

        let chain_id_var = format!("{}_CHAIN_ID", prefix);
        let chain_id = required(&chain_id_var)?
            .parse()
            .wrap_err_with(|| format!("{} must be a valid u64", chain_id_var))?;

        let start_block = match env::var(format!("{}_START_BLOCK", prefix)) {
            Ok(v) if v.eq_ignore_ascii_case("latest") || v.is_empty() => None,
            Ok(v) => Some(
                v.parse()
                    .wrap_err_with(|| format!("{}_START_BLOCK must be a block number or 'latest'", prefix))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            name: name.to_string(),
            rpc_urls,
            signing_rpc_urls,
            chain_id,
            token_address: required(&format!("{}_TOKEN_ADDRESS", prefix))?,
            bridge_address: required(&format!("{}_BRIDGE_ADDRESS", prefix))?,
            start_block,
            confirmations: optional(&format!("{}_CONFIRMATIONS", prefix), default_confirmations())?,
            transfer_recipient: env::var(format!("{}_TRANSFER_RECIPIENT", prefix)).ok(),
        })
    }

    fn validate(&self) -> Result<()> {
        for url in self.rpc_urls.iter().chain(self.signing_rpc_urls.iter()) {
            if !is_http_url(url) {
                return Err(eyre!(
                    "{} RPC URL {} must use http:// or https://",
                    self.name,
                    url
                ));
            }
        }

        if !is_hex_address(&self.token_address) {
            return Err(eyre!(
                "{}.token_address must be a valid hex address (42 chars with 0x prefix)",
                self.name
            ));
        }

        if !is_hex_address(&self.bridge_address) {
            return Err(eyre!(
                "{}.bridge_address must be a valid hex address (42 chars with 0x prefix)",
                self.name
            ));
        }

        if let Some(ref recipient) = self.transfer_recipient {
            if !is_hex_address(recipient) {
                return Err(eyre!(
                    "{}.transfer_recipient must be a valid hex address (42 chars with 0x prefix)",
                    self.name
                ));
            }
        }

        Ok(())
    }

    /// Parsed, immutable endpoint description
    pub fn endpoint(&self) -> Result<ChainEndpoint> {
        Ok(ChainEndpoint {
            name: self.name.clone(),
            chain_id: self.chain_id,
            rpc_urls: self.rpc_urls.clone(),
            signing_rpc_urls: self.signing_rpc_urls.clone(),
            token_address: Address::from_str(&self.token_address)
                .wrap_err_with(|| format!("Invalid {} token address", self.name))?,
            bridge_address: Address::from_str(&self.bridge_address)
                .wrap_err_with(|| format!("Invalid {} bridge address", self.name))?,
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let ethereum = ChainConfig::from_env("ETH", "ethereum")?;
        let polygon = ChainConfig::from_env("POLY", "polygon")?;

        let relayer = RelayerConfig {
            private_key: required("RELAYER_PRIVATE_KEY")?,
            gas_limit: optional("GAS_LIMIT", DEFAULT_GAS_LIMIT)?,
            poll_interval_ms: optional("POLL_INTERVAL_MS", default_poll_interval())?,
            max_block_range: optional("MAX_BLOCK_RANGE", default_max_block_range())?,
            retry_attempts: optional("RETRY_ATTEMPTS", default_retry_attempts())?,
            retry_delay_ms: optional("RETRY_DELAY_MS", default_retry_delay())?,
            retry_max_delay_ms: optional("RETRY_MAX_DELAY_MS", default_retry_max_delay())?,
            receipt_poll_interval_ms: optional(
                "RECEIPT_POLL_INTERVAL_MS",
                default_receipt_poll_interval(),
            )?,
            receipt_timeout_secs: optional("RECEIPT_TIMEOUT_SECS", default_receipt_timeout())?,
            max_reconnect_attempts: optional("MAX_RECONNECT_ATTEMPTS", 0)?,
            api_port: optional("API_PORT", default_api_port())?,
        };

        let config = Config {
            ethereum,
            polygon,
            relayer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.ethereum.validate()?;
        self.polygon.validate()?;

        if self.ethereum.chain_id == self.polygon.chain_id {
            return Err(eyre!(
                "ETH_CHAIN_ID and POLY_CHAIN_ID must differ (both are {})",
                self.ethereum.chain_id
            ));
        }

        let key = &self.relayer.private_key;
        if key.len() != 66 || !key.starts_with("0x") {
            return Err(eyre!(
                "relayer.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.relayer.gas_limit == 0 {
            return Err(eyre!("relayer.gas_limit must be positive"));
        }

        if self.relayer.max_block_range == 0 {
            return Err(eyre!("relayer.max_block_range must be positive"));
        }

        if self.relayer.receipt_timeout_secs == 0 {
            return Err(eyre!("relayer.receipt_timeout_secs must be positive"));
        }

        Ok(())
    }

    pub fn endpoints(&self) -> Result<Vec<ChainEndpoint>> {
        Ok(vec![self.ethereum.endpoint()?, self.polygon.endpoint()?])
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.relayer.retry_attempts,
            initial_backoff: Duration::from_millis(self.relayer.retry_delay_ms),
            max_backoff: Duration::from_millis(self.relayer.retry_max_delay_ms),
            ..Default::default()
        }
    }

    pub fn listener_config(&self, chain: &ChainConfig) -> Result<ListenerConfig> {
        let transfer_recipient = chain
            .transfer_recipient
            .as_deref()
            .map(Address::from_str)
            .transpose()
            .wrap_err_with(|| format!("Invalid {} transfer recipient", chain.name))?;

        Ok(ListenerConfig {
            poll_interval: Duration::from_millis(self.relayer.poll_interval_ms),
            max_block_range: self.relayer.max_block_range,
            confirmations: chain.confirmations,
            start: chain
                .start_block
                .map(StartBlock::Number)
                .unwrap_or(StartBlock::Latest),
            max_reconnect_attempts: self.relayer.max_reconnect_attempts,
            retry: self.retry_config(),
            transfer_recipient,
        })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            gas_limit: self.relayer.gas_limit,
            retry: self.retry_config(),
            receipt_poll_interval: Duration::from_millis(self.relayer.receipt_poll_interval_ms),
            receipt_timeout: Duration::from_secs(self.relayer.receipt_timeout_secs),
        }
    }

    pub fn api_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.relayer.api_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ETH_RPC_URL",
        "ETH_SIGNING_RPC_URL",
        "ETH_CHAIN_ID",
        "ETH_TOKEN_ADDRESS",
        "ETH_BRIDGE_ADDRESS",
        "ETH_START_BLOCK",
        "ETH_CONFIRMATIONS",
        "ETH_TRANSFER_RECIPIENT",
        "POLY_RPC_URL",
        "POLY_SIGNING_RPC_URL",
        "POLY_CHAIN_ID",
        "POLY_TOKEN_ADDRESS",
        "POLY_BRIDGE_ADDRESS",
        "POLY_START_BLOCK",
        "POLY_CONFIRMATIONS",
        "POLY_TRANSFER_RECIPIENT",
        "RELAYER_PRIVATE_KEY",
        "GAS_LIMIT",
        "POLL_INTERVAL_MS",
        "MAX_BLOCK_RANGE",
        "RETRY_ATTEMPTS",
        "RETRY_DELAY_MS",
        "RETRY_MAX_DELAY_MS",
        "RECEIPT_POLL_INTERVAL_MS",
        "RECEIPT_TIMEOUT_SECS",
        "MAX_RECONNECT_ATTEMPTS",
        "API_PORT",
    ];

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn set_minimal_env() {
        for var in VARS {
            env::remove_var(var);
        }
        env::set_var("ETH_RPC_URL", "http://localhost:8545");
        env::set_var("ETH_CHAIN_ID", "1");
        env::set_var("ETH_TOKEN_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3");
        env::set_var("ETH_BRIDGE_ADDRESS", "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512");
        env::set_var("POLY_RPC_URL", "http://localhost:8546, http://localhost:8547");
        env::set_var("POLY_CHAIN_ID", "137");
        env::set_var("POLY_TOKEN_ADDRESS", "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
        env::set_var("POLY_BRIDGE_ADDRESS", "0xCf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9");
        env::set_var("RELAYER_PRIVATE_KEY", KEY);
    }

    #[test]
    #[serial]
    fn test_load_with_defaults() {
        set_minimal_env();
        let config = Config::load_from_env().unwrap();

        assert_eq!(config.ethereum.chain_id, 1);
        assert_eq!(config.polygon.rpc_urls.len(), 2);
        assert_eq!(config.polygon.signing_rpc_urls, config.polygon.rpc_urls);
        assert_eq!(config.ethereum.start_block, None);
        assert_eq!(config.relayer.gas_limit, 800_000);
        assert_eq!(config.relayer.poll_interval_ms, 1000);
        assert_eq!(config.relayer.receipt_timeout_secs, 300);
        assert_eq!(config.relayer.api_port, 9090);

        let listener = config.listener_config(&config.ethereum).unwrap();
        assert_eq!(listener.start, StartBlock::Latest);
        assert_eq!(listener.confirmations, 0);
        assert_eq!(listener.max_block_range, 2000);

        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints[0].name, "ethereum");
        assert_eq!(endpoints[1].chain_id, 137);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        set_minimal_env();
        env::set_var("ETH_START_BLOCK", "19000000");
        env::set_var("ETH_SIGNING_RPC_URL", "https://signer.example");
        env::set_var("POLY_CONFIRMATIONS", "12");
        env::set_var("RETRY_ATTEMPTS", "5");
        env::set_var("RECEIPT_TIMEOUT_SECS", "60");

        let config = Config::load_from_env().unwrap();
        assert_eq!(config.ethereum.start_block, Some(19_000_000));
        assert_eq!(config.ethereum.signing_rpc_urls, vec!["https://signer.example"]);
        assert_eq!(
            config.listener_config(&config.ethereum).unwrap().start,
            StartBlock::Number(19_000_000)
        );
        assert_eq!(config.polygon.confirmations, 12);
        assert_eq!(config.retry_config().max_retries, 5);
        assert_eq!(config.executor_config().receipt_timeout, Duration::from_secs(60));
    }

    #[test]
    #[serial]
    fn test_missing_required_var() {
        set_minimal_env();
        env::remove_var("POLY_BRIDGE_ADDRESS");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("POLY_BRIDGE_ADDRESS"));
    }

    #[test]
    #[serial]
    fn test_rejects_websocket_url() {
        set_minimal_env();
        env::set_var("ETH_RPC_URL", "ws://localhost:8546");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    #[serial]
    fn test_rejects_bad_address_and_key() {
        set_minimal_env();
        env::set_var("ETH_TOKEN_ADDRESS", "0x1234");
        assert!(Config::load_from_env().is_err());

        set_minimal_env();
        env::set_var("RELAYER_PRIVATE_KEY", "deadbeef");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("private_key"));
    }

    #[test]
    #[serial]
    fn test_rejects_same_chain_id() {
        set_minimal_env();
        env::set_var("POLY_CHAIN_ID", "1");
        assert!(Config::load_from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_rejects_unparseable_numbers() {
        set_minimal_env();
        env::set_var("GAS_LIMIT", "abc");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("GAS_LIMIT"));
        assert!(err.to_string().contains("abc"));

        set_minimal_env();
        env::set_var("RETRY_ATTEMPTS", "-1");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("RETRY_ATTEMPTS"));

        set_minimal_env();
        env::set_var("POLY_CONFIRMATIONS", "twelve");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("POLY_CONFIRMATIONS"));

        // Unset still falls back to the default
        set_minimal_env();
        assert_eq!(Config::load_from_env().unwrap().relayer.gas_limit, 800_000);
    }

    #[test]
    #[serial]
    fn test_debug_redacts_private_key() {
        set_minimal_env();
        let config = Config::load_from_env().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(&KEY[2..]));
        assert!(debug.contains("<redacted>"));
    }
}
