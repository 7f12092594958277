//! Live Share Relay Server
//!
//! A standalone relay that joins senders and web receivers into rooms keyed
//! by token and fans field updates out between them.

use anyhow::Result;
use clap::Parser;
use liveshare_relay::{Relay, RelayConfig};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "liveshare-relay")]
#[command(about = "Live Share Relay Server")]
#[command(version)]
struct Cli {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:7340")]
    listen: SocketAddr,

    /// Server name shown in logs
    #[arg(short, long, default_value = "Live Share Relay")]
    name: String,

    /// Maximum simultaneous connections
    #[arg(long, default_value_t = 10_000)]
    max_connections: usize,

    /// Maximum connections per room
    #[arg(long, default_value_t = 64)]
    room_capacity: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins unless --verbose is given
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting {}", cli.name);
    tracing::info!("Listening on: {}", cli.listen);

    let config = RelayConfig {
        name: cli.name.clone(),
        max_connections: cli.max_connections,
        room_capacity: cli.room_capacity,
    };
    let relay = Relay::new(config);

    tracing::info!("Relay ready, accepting connections...");

    let addr = cli.listen.to_string();
    tokio::select! {
        result = relay.serve_websocket(&addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                "Shutting down ({} rooms, {} connections)",
                relay.room_count(),
                relay.connection_count()
            );
            relay.stop();
        }
    }

    Ok(())
}
