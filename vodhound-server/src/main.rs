//! Vodhound HTTP server
//!
//! Serves the live-monitor control API and clip search over the core
//! library. One process owns the data directory; the monitor supervisor
//! and the search service share it through `AppState`.

mod config;
mod error;
mod http;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::http::create_router;
use crate::state::AppState;

const APP_NAME: &str = "vodhound-server";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        match ServerConfig::from_file(std::path::Path::new(&config_path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config file {}: {}. Using defaults.", config_path, e);
                ServerConfig::default()
            }
        }
    } else {
        ServerConfig::default()
    };
    tracing::info!("Configuration loaded: {:?}", config);

    let state = Arc::new(AppState::initialize(config.clone())?);
    let app = create_router(state.clone());

    let addr: SocketAddr = config.socket_addr().parse()?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The worker may be mid-extraction; give it its join timeout before
    // the process exits.
    if state.monitor.stop().await {
        tracing::info!("monitor stopped during shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", e);
        return;
    }
    tracing::info!("shutdown signal received");
}

/// Initialize logging with tracing
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vodhound_server=debug,vodhound_lib=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
