//! End-to-end relay flows over in-memory chains
//!
//! Run with: cargo test --test relay_flow

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use audt_bridge_relayer::chain::{ChainClient, ChainSet};
use audt_bridge_relayer::executor::ExecutorConfig;
use audt_bridge_relayer::listener::{ListenerConfig, StartBlock};
use audt_bridge_relayer::nonce::NonceTracker;
use audt_bridge_relayer::relay::{audt_routes, RelayManager};
use audt_bridge_relayer::retry::RetryConfig;
use audt_bridge_relayer::state::BridgeState;
use audt_bridge_relayer::testing::{MockChain, MOCK_BRIDGE};
use audt_bridge_relayer::types::RelayCall;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const ETH: u64 = 1;
const POLY: u64 = 137;

fn one_token() -> U256 {
    U256::from(1_000_000_000_000_000_000u128)
}

fn listener_config() -> ListenerConfig {
    ListenerConfig {
        poll_interval: Duration::from_millis(5),
        start: StartBlock::Number(0),
        retry: RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        receipt_poll_interval: Duration::from_millis(5),
        receipt_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

struct Bridge {
    state: Arc<BridgeState>,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<eyre::Result<()>>,
}

impl Bridge {
    /// Start a relayer process against the two chains with fresh state
    fn start(eth: &Arc<MockChain>, poly: &Arc<MockChain>) -> Self {
        let eth_client: Arc<dyn ChainClient> = eth.clone();
        let poly_client: Arc<dyn ChainClient> = poly.clone();
        let chains = ChainSet::from_clients(vec![eth_client, poly_client]);

        let routes = audt_routes(&chains, ETH, POLY, listener_config(), listener_config())
            .expect("routes");
        let state = Arc::new(BridgeState::new());
        let manager = RelayManager::new(
            routes,
            Arc::new(NonceTracker::new(chains)),
            state.clone(),
            executor_config(),
        );

        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(manager.run(shutdown_rx));
        Self {
            state,
            shutdown,
            handle,
        }
    }

    async fn wait_for_finished(&self, count: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let counters = self.state.snapshot().await.counters;
            if counters.confirmed + counters.duplicate + counters.failed >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} finished relays, have {:?}",
                count,
                counters
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.send(()).await.expect("manager running");
        self.handle.await.expect("join").expect("clean shutdown");
    }
}

#[tokio::test]
async fn test_round_trip_between_chains() {
    let eth = Arc::new(MockChain::new(ETH, "ethereum"));
    let poly = Arc::new(MockChain::new(POLY, "polygon"));
    let user = Address::repeat_byte(0x42);
    let identifier = B256::repeat_byte(0x77);

    // User locks 1 AUDT on ethereum; the polygon bridge knows the identifier
    poly.register_identifier(identifier, user, one_token());
    eth.emit_amount_received(10, user, one_token(), identifier);

    let bridge = Bridge::start(&eth, &poly);
    bridge.wait_for_finished(1).await;

    let polygon_txs = poly.submitted();
    assert_eq!(polygon_txs.len(), 1);
    assert_eq!(
        polygon_txs[0].call,
        RelayCall::CreateNewTokens { identifier }
    );
    assert_eq!(poly.balance(user), one_token());

    // User sends the tokens back to the polygon bridge
    poly.emit_transfer(poly.head() + 1, user, MOCK_BRIDGE, one_token());
    bridge.wait_for_finished(2).await;

    let ethereum_txs = eth.submitted();
    assert_eq!(ethereum_txs.len(), 1);
    assert_eq!(
        ethereum_txs[0].call,
        RelayCall::Mint {
            recipient: user,
            amount: one_token()
        }
    );
    assert_eq!(eth.balance(user), one_token());

    // The polygon mint was never mirrored back
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(eth.submitted().len(), 1);
    assert_eq!(poly.submitted().len(), 1);

    let snapshot = bridge.state.snapshot().await;
    assert_eq!(snapshot.counters.confirmed, 2);
    assert!(snapshot.in_flight.is_empty());
    assert!(snapshot.cursors.contains_key(&ETH));
    assert!(snapshot.cursors.contains_key(&POLY));

    bridge.stop().await;
}

#[tokio::test]
async fn test_restart_replays_without_double_relay() {
    let eth = Arc::new(MockChain::new(ETH, "ethereum"));
    let poly = Arc::new(MockChain::new(POLY, "polygon"));
    let user = Address::repeat_byte(0x43);
    let identifier = B256::repeat_byte(0x78);

    poly.register_identifier(identifier, user, one_token());
    poly.reject_repeated_mints(true);
    eth.reject_repeated_mints(true);
    eth.emit_amount_received(3, user, one_token(), identifier);
    poly.emit_transfer(4, user, MOCK_BRIDGE, U256::from(500u64));

    let first = Bridge::start(&eth, &poly);
    first.wait_for_finished(2).await;
    first.stop().await;

    // A new process has no memory and rescans from block 0
    let second = Bridge::start(&eth, &poly);
    second.wait_for_finished(2).await;

    let counters = second.state.snapshot().await.counters;
    assert_eq!(counters.duplicate, 2);
    assert_eq!(counters.failed, 0);
    assert_eq!(eth.submitted().len(), 1);
    assert_eq!(poly.submitted().len(), 1);
    assert_eq!(eth.balance(user), U256::from(500u64));
    assert_eq!(poly.balance(user), one_token());

    second.stop().await;
}

#[tokio::test]
async fn test_unknown_identifier_fails_and_route_continues() {
    let eth = Arc::new(MockChain::new(ETH, "ethereum"));
    let poly = Arc::new(MockChain::new(POLY, "polygon"));
    let user = Address::repeat_byte(0x44);
    let known = B256::repeat_byte(0x01);

    poly.register_identifier(known, user, U256::from(9u64));
    eth.emit_amount_received(5, user, U256::from(1u64), B256::repeat_byte(0xee));
    eth.emit_amount_received(6, user, U256::from(9u64), known);

    let bridge = Bridge::start(&eth, &poly);
    bridge.wait_for_finished(2).await;

    let counters = bridge.state.snapshot().await.counters;
    assert_eq!(counters.failed, 1);
    assert_eq!(counters.confirmed, 1);
    assert_eq!(poly.balance(user), U256::from(9u64));

    bridge.stop().await;
}
