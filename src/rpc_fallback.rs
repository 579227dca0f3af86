use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use tracing::warn;

use crate::error::BridgeError;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Whether the URL uses a transport the relayer can poll over.
pub fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// URLs in the order a reconnect should try them: the ones after `current`
/// first, wrapping around, with `current` itself last.
pub fn rotation_order(urls: &[String], current: usize) -> Vec<String> {
    if urls.is_empty() {
        return Vec::new();
    }
    let start = (current + 1) % urls.len();
    urls[start..].iter().chain(urls[..start].iter()).cloned().collect()
}

/// Try each URL in order and return the first provider that answers
/// `eth_chainId` with `expected_chain_id`.
pub async fn connect_first(
    urls: &[String],
    expected_chain_id: u64,
) -> Result<(RootProvider<Http<Client>>, String), BridgeError> {
    let mut last_error = String::from("no RPC URLs configured");

    for url in urls {
        let parsed = match url.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                last_error = format!("invalid RPC URL {}: {}", url, e);
                warn!(url = %url, error = %e, "Skipping invalid RPC URL");
                continue;
            }
        };
        let provider = ProviderBuilder::new().on_http(parsed);

        match provider.get_chain_id().await {
            Ok(chain_id) if chain_id == expected_chain_id => return Ok((provider, url.clone())),
            Ok(chain_id) => {
                last_error = format!(
                    "{} reports chain id {}, expected {}",
                    url, chain_id, expected_chain_id
                );
                warn!(url = %url, chain_id, expected_chain_id, "RPC chain id mismatch");
            }
            Err(e) => {
                last_error = format!("{} unreachable: {}", url, e);
                warn!(url = %url, error = %e, "RPC endpoint unreachable, trying next");
            }
        }
    }

    Err(BridgeError::connection(expected_chain_id, last_error))
}
