//! Triedis - A Prefix-Keyed In-Memory Database
//!
//! Entry point for the Triedis server: reads the configuration, binds the
//! listener and spawns a task per client connection.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use triedis::commands::CommandHandler;
use triedis::config::{CliAction, Config};
use triedis::connection::{handle_connection, ConnectionStats};
use triedis::storage::DatabaseRegistry;

fn print_help() {
    println!(
        r#"
Triedis - A Prefix-Keyed In-Memory Database

USAGE:
    triedis [OPTIONS]

OPTIONS:
    -a, --addr <ADDR>    Address to listen on (default: {})
    -v, --version        Print version information
    -h, --help           Print this help message

ENVIRONMENT:
    RUST_LOG             Log filter, e.g. RUST_LOG=triedis=debug (default: info)

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET 10.0.0.0/8 corp
    OK
    127.0.0.1:6379> SET 10.20.0.0/16 lab
    OK
    127.0.0.1:6379> GET 10.20.1.7
    "lab"
    127.0.0.1:6379> GET 10.99.0.1
    "corp"
"#,
        triedis::DEFAULT_ADDR
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
  _        _          _ _
 | |_ _ __(_) ___  __| (_)___
 | __| '__| |/ _ \/ _` | / __|
 | |_| |  | |  __/ (_| | \__ \
  \__|_|  |_|\___|\__,_|_|___/

Triedis v{} - Longest-Prefix-Match Key-Value Server
──────────────────────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        triedis::VERSION,
        config.addr
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(CliAction::Serve(config)) => config,
        Ok(CliAction::Help) => {
            print_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("Triedis version {}", triedis::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    // Databases are created on first use and shared by every connection
    let registry = Arc::new(DatabaseRegistry::new());
    let stats = Arc::new(ConnectionStats::new());
    let handler = CommandHandler::with_stats(registry, Arc::clone(&stats));

    let listener = TcpListener::bind(config.addr).await?;
    info!("Listening on {}", config.addr);

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    };

    tokio::select! {
        _ = accept_loop(listener, handler, stats) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
