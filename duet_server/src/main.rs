//! Entry point for the duet signaling server

use clap::Parser;
use duet_server::{Server, ServerConfig, SignalingError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), SignalingError> {
    let config = ServerConfig::parse();

    // Priority: --verbose flag, then RUST_LOG env var, then default "info"
    let log_level = if config.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting duet-signaling v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.listen_addr();
    let server = Server::new(config)?;
    let listener = TcpListener::bind(&addr).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        on_signal.cancel();
    });

    server.run(listener, shutdown).await
}
