//! Retry and error classification for relay submissions and listener reconnects
//!
//! Provides exponential backoff, gas bumping, and string-based classification of
//! node error messages.

use std::time::Duration;

/// Retry configuration shared by the executor and the listeners
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
    /// Gas price bump percentage per retry
    pub gas_bump_percent: u32,
    /// Maximum gas price multiplier (e.g., 3 = 3x the base price)
    pub max_gas_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            gas_bump_percent: 20,
            max_gas_multiplier: 3.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Calculate gas price for a given attempt
    pub fn gas_price_for_attempt(&self, base_gas_price: u128, attempt: u32) -> u128 {
        if attempt == 0 {
            return base_gas_price;
        }

        let multiplier = 1.0 + (self.gas_bump_percent as f64 / 100.0) * (attempt as f64);
        let capped_multiplier = multiplier.min(self.max_gas_multiplier);

        (base_gas_price as f64 * capped_multiplier) as u128
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Destination already relayed this identifier
    Duplicate,
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// Transaction underpriced - retry with higher gas
    Underpriced,
    /// Nonce already used on chain
    NonceTooLow,
    /// The node already holds this exact signed transaction
    AlreadyKnown,
    /// Nonce too high - wait for pending transactions
    NonceTooHigh,
    /// Permanent failure - do not retry (revert, insufficient funds)
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Transient
                | ErrorClass::Underpriced
                | ErrorClass::NonceTooHigh
                | ErrorClass::Unknown
        )
    }
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Checked first: duplicate rejections arrive as reverts
    if error_lower.contains("duplicate")
        || error_lower.contains("already processed")
        || error_lower.contains("already relayed")
        || error_lower.contains("already minted")
        || error_lower.contains("identifier already")
    {
        return ErrorClass::Duplicate;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("already known")
        || error_lower.contains("known transaction")
        || error_lower.contains("already imported")
    {
        return ErrorClass::AlreadyKnown;
    }

    if error_lower.contains("nonce too low") {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") {
        return ErrorClass::NonceTooHigh;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("caller is not")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
