//! Tether bridge endpoint binary.
//!
//! Accepts WebSocket connections as bridge sessions and serves the
//! bootstrap script to plain requests. What runs over the bridge is up to
//! the embedder; this binary just keeps the endpoint up and logs session
//! lifecycles.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::CLOSED_EVENT;
use tether_server::{server, ConnectionHook};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tether-server")]
#[command(about = "Remote-eval bridge endpoint")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Client bootstrap script served to non-upgrade requests
    #[arg(long, default_value = "client.lua")]
    script: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Starting tether bridge endpoint");

    let script = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| {
            format!(
                "failed to read bootstrap script {}",
                args.script.display()
            )
        })?;

    let on_connection: ConnectionHook = Arc::new(|session| {
        info!("peer connected");
        tokio::spawn(async move {
            let mut events = session.subscribe();
            while let Ok(event) = events.recv().await {
                if event.name == CLOSED_EVENT {
                    info!("peer disconnected");
                    break;
                }
                info!("event from peer: {}", event.name);
            }
        });
    });

    let addr = server::start_server(&args.host, args.port, script, on_connection).await?;

    // Printed for embedders to read (intentional stdout for IPC)
    println!("TETHER_PORT={}", addr.port());

    info!("Bridge endpoint running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
