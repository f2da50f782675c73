//! Anonymous 1:1 Stranger Chat Server - Entry Point
//!
//! Picks the coordination backend, starts the TCP listener, and spawns
//! one handler task per connection.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stranger_chat::{
    handle_connection, Directory, EventBus, MemoryBus, MemoryDirectory, RedisBus, RedisDirectory,
};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=stranger_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stranger_chat=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    // REDIS_URL selects the shared coordination store; without it a
    // single process coordinates in memory (no multi-instance support)
    let (directory, bus): (Arc<dyn Directory>, Arc<dyn EventBus>) = match env::var("REDIS_URL") {
        Ok(url) => {
            info!("Coordinating through Redis");
            (
                Arc::new(RedisDirectory::connect(&url).await?),
                Arc::new(RedisBus::connect(&url).await?),
            )
        }
        Err(_) => {
            info!("REDIS_URL not set, coordinating in process (single instance only)");
            (Arc::new(MemoryDirectory::new()), Arc::new(MemoryBus::new()))
        }
    };

    // Start TCP listener
    let listener = TcpListener::bind(&addr).await?;
    info!("Stranger chat server listening on {}", addr);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("New connection from {}", peer);
                let directory = directory.clone();
                let bus = bus.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, directory, bus).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
