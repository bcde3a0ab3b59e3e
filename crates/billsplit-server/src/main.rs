// Bill-split server entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config (copying defaults/ into config/ on first run)
// 3. Spawn the ledger actor
// 4. Bind and spawn the WebSocket server
// 5. Wait for Ctrl+C
// 6. Stop the server, drain the actor

use std::time::Duration;

use anyhow::Context;
use billsplit_app::config;
use billsplit_app::AppState;
use billsplit_server::ws_server;
use tracing::{error, info, warn};

/// How long to wait for the ledger actor to drain on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("billsplit starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: bind={}, policy={:?}, broadcast_updates={}",
        config.bind_addr(),
        config.ledger.percentage_policy,
        config.server.broadcast_updates
    );

    // 3. Spawn the ledger actor
    let state = AppState::from_config(&config);
    let (handle, actor) = billsplit_app::spawn(state, config.ledger.command_buffer);

    // 4. Bind and spawn the WebSocket server
    let listener = ws_server::bind(&config.bind_addr()).await?;
    let server_handle = handle.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, server_handle).await {
            error!("WebSocket server error: {}", e);
        }
    });

    // 5. Wait for Ctrl+C
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");

    // 6. Cleanup
    server.abort();
    if handle.shutdown().await.is_err() {
        warn!("Ledger actor had already stopped");
    }
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, actor).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("Ledger actor error: {}", e),
        Ok(Err(e)) => error!("Ledger actor task failed: {}", e),
        Err(_) => warn!("Ledger actor did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }

    info!("billsplit shut down cleanly");
    Ok(())
}

/// Initialize tracing to stderr, filtered by `RUST_LOG`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("billsplit=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
