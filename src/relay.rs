//! Relay routes and their supervisor
//!
//! A route pairs one source listener with one destination executor. The
//! manager runs every route as its own task; a route that stops leaves the
//! others running, so the bridge degrades to one-directional relaying until
//! the process is restarted.

use eyre::{eyre, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::chain::{ChainClient, ChainSet};
use crate::error::BridgeError;
use crate::executor::{ExecutorConfig, RelayExecutor, Submission};
use crate::listener::{EventListener, ListenerConfig};
use crate::nonce::NonceTracker;
use crate::state::BridgeState;
use crate::types::{RelayAction, WatchKind};

/// Receipts awaited concurrently per route before submission pauses
pub const MAX_PENDING_CONFIRMATIONS: usize = 64;

/// One direction of the bridge.
#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub source: Arc<dyn ChainClient>,
    pub watch: WatchKind,
    pub destination: Arc<dyn ChainClient>,
    pub action: RelayAction,
    pub listener: ListenerConfig,
}

impl Route {
    pub fn new(
        source: Arc<dyn ChainClient>,
        watch: WatchKind,
        destination: Arc<dyn ChainClient>,
        action: RelayAction,
        listener: ListenerConfig,
    ) -> Self {
        let name = format!(
            "{}->{}",
            source.endpoint().name,
            destination.endpoint().name
        );
        Self {
            name,
            source,
            watch,
            destination,
            action,
            listener,
        }
    }
}

/// The two AUDT routes:
/// - Ethereum `AmountReceived` -> Polygon `createNewTokens(identifier)`
/// - Polygon `Transfer` -> Ethereum `mint(from, value)`
pub fn audt_routes(
    chains: &ChainSet,
    ethereum_chain_id: u64,
    polygon_chain_id: u64,
    ethereum_listener: ListenerConfig,
    polygon_listener: ListenerConfig,
) -> Result<Vec<Route>, BridgeError> {
    let ethereum = chains.get(ethereum_chain_id)?;
    let polygon = chains.get(polygon_chain_id)?;

    Ok(vec![
        Route::new(
            ethereum.clone(),
            WatchKind::AmountReceived,
            polygon.clone(),
            RelayAction::CreateNewTokens,
            ethereum_listener,
        ),
        Route::new(
            polygon,
            WatchKind::Transfer,
            ethereum,
            RelayAction::Mint,
            polygon_listener,
        ),
    ])
}

/// Runs all routes concurrently
pub struct RelayManager {
    routes: Vec<Route>,
    nonces: Arc<NonceTracker>,
    state: Arc<BridgeState>,
    executor_config: ExecutorConfig,
}

impl RelayManager {
    pub fn new(
        routes: Vec<Route>,
        nonces: Arc<NonceTracker>,
        state: Arc<BridgeState>,
        executor_config: ExecutorConfig,
    ) -> Self {
        for route in &routes {
            info!(
                route = %route.name,
                watch = route.watch.as_str(),
                action = ?route.action,
                "Relay route configured"
            );
        }
        Self {
            routes,
            nonces,
            state,
            executor_config,
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Run until shutdown is signalled. Returns an error only when every route
    /// has stopped.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = JoinSet::new();

        for route in self.routes {
            let executor = RelayExecutor::new(
                route.name.clone(),
                route.destination.clone(),
                route.action,
                self.nonces.clone(),
                self.state.clone(),
                self.executor_config.clone(),
            );
            let listener = EventListener::new(
                route.source.clone(),
                route.watch,
                self.state.clone(),
                route.listener.clone(),
            );
            join_set.spawn(run_route(route.name, listener, executor));
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping relay routes");
                    join_set.abort_all();
                    return Ok(());
                }
                maybe_done = join_set.join_next() => {
                    match maybe_done {
                        Some(Ok(name)) => {
                            error!(
                                route = %name,
                                remaining = join_set.len(),
                                "Relay route stopped; remaining routes keep running"
                            );
                        }
                        Some(Err(e)) => {
                            error!(
                                remaining = join_set.len(),
                                "Relay route task panicked: {:?}",
                                e
                            );
                        }
                        None => {
                            error!("All relay routes stopped");
                            return Err(eyre!("all relay routes stopped"));
                        }
                    }
                }
            }
        }
    }
}

/// Feed one listener into one executor until the listener gives up. Returns
/// the route name.
async fn run_route(name: String, listener: EventListener, executor: RelayExecutor) -> String {
    info!(route = %name, "Relay route started");

    let mut intents = Box::pin(listener.into_stream());
    let mut confirmations = JoinSet::new();

    loop {
        if confirmations.len() >= MAX_PENDING_CONFIRMATIONS {
            if let Some(Err(e)) = confirmations.join_next().await {
                error!(route = %name, "Confirmation task failed: {:?}", e);
            }
            continue;
        }

        tokio::select! {
            maybe_intent = intents.next() => {
                let Some(intent) = maybe_intent else {
                    break;
                };
                match executor.submit(intent).await {
                    Submission::Pending(pending) => {
                        confirmations.spawn(pending.confirm());
                    }
                    Submission::Done(_) => {}
                    Submission::Skipped(reason) => {
                        warn!(route = %name, reason = reason.as_str(), "Intent skipped");
                    }
                }
            }
            Some(joined) = confirmations.join_next(), if !confirmations.is_empty() => {
                if let Err(e) = joined {
                    error!(route = %name, "Confirmation task failed: {:?}", e);
                }
            }
        }
    }

    // Let submitted relays finish before reporting the route down
    while let Some(joined) = confirmations.join_next().await {
        if let Err(e) = joined {
            error!(route = %name, "Confirmation task failed: {:?}", e);
        }
    }
    name
}
