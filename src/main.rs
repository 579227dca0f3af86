use std::sync::Arc;

use audt_bridge_relayer::api::{self, AppState};
use audt_bridge_relayer::chain::ChainSet;
use audt_bridge_relayer::config::Config;
use audt_bridge_relayer::nonce::NonceTracker;
use audt_bridge_relayer::relay::{audt_routes, RelayManager};
use audt_bridge_relayer::state::BridgeState;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting AUDT Bridge Relayer");

    let config = Config::load()?;
    tracing::info!(
        ethereum_chain_id = config.ethereum.chain_id,
        polygon_chain_id = config.polygon.chain_id,
        ethereum_rpc_count = config.ethereum.rpc_urls.len(),
        polygon_rpc_count = config.polygon.rpc_urls.len(),
        "Configuration loaded"
    );

    let chains = ChainSet::connect(&config.endpoints()?, &config.relayer.private_key).await?;
    tracing::info!(chains = chains.len(), "Chains connected");

    let state = Arc::new(BridgeState::new());
    let nonces = Arc::new(NonceTracker::new(chains.clone()));

    let routes = audt_routes(
        &chains,
        config.ethereum.chain_id,
        config.polygon.chain_id,
        config.listener_config(&config.ethereum)?,
        config.listener_config(&config.polygon)?,
    )?;
    let manager = RelayManager::new(
        routes,
        nonces.clone(),
        state.clone(),
        config.executor_config(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    // Start metrics/API server
    let api_addr = config.api_addr();
    let app = AppState { state, nonces };
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_addr, app).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let result = manager.run(shutdown_rx).await;
    audt_bridge_relayer::metrics::set_up(false);

    match result {
        Ok(()) => {
            tracing::info!("AUDT Bridge Relayer stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Relay manager error");
            Err(e)
        }
    }
}

/// Initialize tracing/logging with structured output.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,audt_bridge_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
