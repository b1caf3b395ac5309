//! Voice Chat Relay Server - Entry Point
//!
//! Loads configuration, binds the public port, and runs the accept loop and
//! operator console until Ctrl-C.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use voicechat_server::{console, Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=voicechat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voicechat_server=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Failing to bind the public port ends the process
    let server = Server::bind(&config).await?;
    info!("Server host: {}", config.host);
    info!("Serving on port {}", server.local_addr()?.port());

    tokio::spawn(console::run(Arc::clone(&server)));
    let accept_loop = tokio::spawn(Arc::clone(&server).run());

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    server.shutdown();
    let _ = accept_loop.await;

    Ok(())
}
