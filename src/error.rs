//! Error taxonomy for the relay core
//!
//! Per-event and per-submission failures are expressed as [`BridgeError`] so the
//! listener and executor can decide locally whether to skip, retry, or record a
//! failure. Process-level failures (config, startup) use `eyre`.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors produced by chain I/O, event decoding, and relay submission.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Chain endpoint unreachable, or a read/sign request failed at the transport level.
    #[error("connection error on chain {chain_id}: {message}")]
    Connection { chain_id: u64, message: String },

    /// A log could not be decoded into a bridge intent.
    #[error("decode error: {0}")]
    Decode(String),

    /// The node rejected the transaction or it reverted on chain.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// The destination contract refused a repeated relay for the same correlation identifier.
    #[error("duplicate relay rejected by destination: {0}")]
    DuplicateRelay(String),

    /// No connection or nonce state registered for the chain.
    #[error("unknown chain {0}")]
    UnknownChain(u64),
}

impl BridgeError {
    pub fn connection(chain_id: u64, message: impl fmt::Display) -> Self {
        BridgeError::Connection {
            chain_id,
            message: message.to_string(),
        }
    }

    /// The `ErrorKind` recorded on a relay result for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Connection { .. } | BridgeError::UnknownChain(_) => ErrorKind::Connection,
            BridgeError::Decode(_) => ErrorKind::Decode,
            BridgeError::SubmissionFailed(_) => ErrorKind::SubmissionFailed,
            BridgeError::DuplicateRelay(_) => ErrorKind::DuplicateRelay,
        }
    }
}

/// Failure category attached to a `RelayResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Decode,
    SubmissionFailed,
    /// Success-equivalent: the transfer was already relayed.
    DuplicateRelay,
    /// No receipt arrived within the configured window.
    ConfirmationTimeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Decode => "decode",
            ErrorKind::SubmissionFailed => "submission_failed",
            ErrorKind::DuplicateRelay => "duplicate_relay",
            ErrorKind::ConfirmationTimeout => "confirmation_timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
