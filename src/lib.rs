//! AUDT bridge relayer
//!
//! Watches the AUDT token on Ethereum and Polygon and completes bridge
//! transfers on the opposite chain:
//! - Ethereum `AmountReceived` -> Polygon `createNewTokens(identifier)`
//! - Polygon `Transfer` -> Ethereum `mint(from, value)`

pub mod api;
pub mod bounded_cache;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod executor;
pub mod listener;
pub mod metrics;
pub mod nonce;
pub mod relay;
pub mod retry;
pub mod rpc_fallback;
pub mod state;
pub mod types;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::BridgeError;
