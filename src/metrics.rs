//! Prometheus metrics for the AUDT bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Gauge, HistogramVec, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // Listener metrics
    pub static ref LATEST_BLOCK: IntGaugeVec = register_int_gauge_vec!(
        "audt_relayer_latest_block",
        "Latest block number fully processed",
        &["chain"]
    ).unwrap();

    pub static ref INTENTS_DETECTED: IntCounterVec = register_int_counter_vec!(
        "audt_relayer_intents_detected_total",
        "Total number of bridge intents emitted by listeners",
        &["chain", "event"]
    ).unwrap();

    pub static ref INTENTS_FILTERED: IntCounterVec = register_int_counter_vec!(
        "audt_relayer_intents_filtered_total",
        "Total number of events dropped before becoming intents",
        &["chain", "reason"]
    ).unwrap();

    pub static ref DECODE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "audt_relayer_decode_errors_total",
        "Total number of events that failed to decode",
        &["chain"]
    ).unwrap();

    pub static ref RECONNECTS: IntCounterVec = register_int_counter_vec!(
        "audt_relayer_reconnects_total",
        "Total number of listener reconnects after RPC failures",
        &["chain"]
    ).unwrap();

    // Relay metrics
    pub static ref RELAYS: IntCounterVec = register_int_counter_vec!(
        "audt_relayer_relays_total",
        "Total number of finalized relays by outcome",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref SUBMISSION_RETRIES: IntCounterVec = register_int_counter_vec!(
        "audt_relayer_submission_retries_total",
        "Total number of relay submission retries",
        &["chain", "class"]
    ).unwrap();

    pub static ref NEXT_NONCE: IntGaugeVec = register_int_gauge_vec!(
        "audt_relayer_next_nonce",
        "Next nonce the tracker will hand out",
        &["chain"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "audt_relayer_relay_latency_seconds",
        "Time from intent detection to relay finalization",
        &["route"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "audt_relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a block range fully handed to the executor
pub fn record_block_processed(chain: &str, block_number: u64) {
    LATEST_BLOCK
        .with_label_values(&[chain])
        .set(block_number as i64);
}

pub fn record_intent_detected(chain: &str, event: &str) {
    INTENTS_DETECTED.with_label_values(&[chain, event]).inc();
}

pub fn record_intent_filtered(chain: &str, reason: &str) {
    INTENTS_FILTERED.with_label_values(&[chain, reason]).inc();
}

pub fn record_decode_error(chain: &str) {
    DECODE_ERRORS.with_label_values(&[chain]).inc();
}

pub fn record_reconnect(chain: &str) {
    RECONNECTS.with_label_values(&[chain]).inc();
}

/// Record a finalized relay; `outcome` is "confirmed" or an `ErrorKind` string
pub fn record_relay(chain: &str, outcome: &str) {
    RELAYS.with_label_values(&[chain, outcome]).inc();
}

pub fn record_submission_retry(chain: &str, class: &str) {
    SUBMISSION_RETRIES.with_label_values(&[chain, class]).inc();
}

pub fn set_next_nonce(chain: &str, nonce: u64) {
    NEXT_NONCE.with_label_values(&[chain]).set(nonce as i64);
}

pub fn record_latency(route: &str, seconds: f64) {
    RELAY_LATENCY.with_label_values(&[route]).observe(seconds);
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}
