// src/main.rs

//! The main entry point for the ws-dispatch server application.

use anyhow::Result;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};
use ws_dispatch::config::Config;
use ws_dispatch::meter::{DEFAULT_INTERVAL, MeterFeed};
use ws_dispatch::server::Server;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("ws-dispatch version {VERSION}");
        return Ok(());
    }

    // An explicit --config must exist; the default path is optional.
    let explicit_config = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_result = match explicit_config {
        Some(path) => Config::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::from_file(DEFAULT_CONFIG_PATH),
        None => Ok(Config::default()),
    };
    let mut config = match config_result {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    // Override port if provided as a command-line argument
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).map(|s| s.parse::<u16>()) {
            Some(Ok(port)) if port != 0 => config.port = port,
            Some(_) => {
                eprintln!("Invalid port number: {}", args[port_index + 1]);
                std::process::exit(1);
            }
            None => {
                eprintln!("--port flag requires a value");
                std::process::exit(1);
            }
        }
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    let server = Server::new(config);
    let feed = Arc::new(MeterFeed::new(DEFAULT_INTERVAL));
    feed.install(&server);
    info!(
        "Registered level-meter commands on port {}",
        server.config().port
    );

    match server.start().await {
        Ok(()) => Ok(()),
        Err(ws_dispatch::WsError::AlreadyStarted) => {
            warn!("WebSocket server already started");
            Ok(())
        }
        Err(e) => {
            error!("Server runtime error: {}", e);
            Err(e.into())
        }
    }
}
