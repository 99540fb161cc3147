//! Multi-user Chat Relay - Entry Point
//!
//! Binds the listener and serves until a client sends SHUTDOWN or Ctrl-C.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    // Optional port from command line, default 1500
    let config = ServerConfig::from_args(env::args().skip(1))?;

    // Bind failure is fatal
    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!("Chat server listening on {}", server.local_addr()?);

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            handle.shutdown().await;
        }
    });

    server.run().await;

    Ok(())
}
