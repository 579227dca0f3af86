//! Testing Utilities Module
//!
//! In-memory stand-ins for the chains the relayer talks to, used by unit tests
//! and the end-to-end tests under `tests/`. Compiled for unit tests and when
//! the `testing` feature is enabled.
//!
//! ## Submodules
//!
//! - `mock_chain` - `ChainClient` implementation with scripted logs, nonces,
//!   failures and contract behavior

pub mod mock_chain;

pub use mock_chain::*;
