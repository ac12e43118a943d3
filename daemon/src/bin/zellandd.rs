// zelland daemon
// Serves assets and the device socket, accepts trigger calls from the local CLI

use anyhow::{Context, Result};
use axum::serve::ListenerExt;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use zelland_lib::daemon::config::Config;
use zelland_lib::daemon::gateway::router;
use zelland_lib::daemon::state::{AppState, SWEEP_INTERVAL};
use zelland_lib::daemon::tls::{load_acceptor, TlsListener};
use zelland_lib::logging;

#[derive(Parser, Debug)]
#[command(name = "zellandd", about = "zelland display daemon", version)]
struct Args {
    /// JSON config file (defaults to $ZELLAND_CONFIG, then built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the config file
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?
    .with_port_override(args.port);

    logging::init(&config.log_level).map_err(anyhow::Error::msg)?;

    let tls = config.tls().context("Invalid TLS configuration")?;
    let acceptor = tls
        .as_ref()
        .map(load_acceptor)
        .transpose()
        .context("Failed to load TLS material")?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let state = AppState::new();
    let sweeper = state.spawn_sweeper(SWEEP_INTERVAL);
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    match acceptor {
        Some(acceptor) => {
            tracing::info!(%addr, "daemon listening (https/wss)");
            let listener =
                TlsListener::new(listener, acceptor).context("Failed to start TLS listener")?;
            // No-op tap: lets axum derive ConnectInfo<SocketAddr> from the listener's Addr
            let listener = listener.tap_io(|_| {});
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;
        }
        None => {
            tracing::info!(%addr, "daemon listening (http/ws)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;
        }
    }

    sweeper.abort();
    tracing::info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down daemon...");
}
