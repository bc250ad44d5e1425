//! EmberKV server binary.
//!
//! Parses the configuration, starts the reaper, and accepts connections
//! until Ctrl+C.

use clap::Parser;
use emberkv::commands::{CommandHandler, CommandTable};
use emberkv::config::Config;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::storage::{Reaper, StorageEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = emberkv::VERSION, "starting emberkv");

    let storage = Arc::new(StorageEngine::new());
    let reaper = Reaper::start(Arc::clone(&storage), config.reaper());

    let table = Arc::new(CommandTable::with_builtins());
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(addr = %config.bind_address(), "listening");

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), table, Arc::clone(&stats)) => {}
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
            }
        }
    }

    reaper.stop();

    let store = storage.stats();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        protocol_errors = stats.protocol_errors.load(Ordering::Relaxed),
        keys = store.keys,
        expired = store.expired,
        "server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    table: Arc<CommandTable>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(%addr, error = %e, "failed to set TCP_NODELAY");
                }
                let handler = CommandHandler::with_table(Arc::clone(&storage), Arc::clone(&table));
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}
