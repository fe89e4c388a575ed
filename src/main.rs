// src/main.rs

//! The main entry point for the CitrineDB server application.

use anyhow::Result;
use citrinedb::config::Config;
use citrinedb::server;
use std::env;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("CitrineDB version {VERSION}");
        return Ok(());
    }

    // The configuration path can be provided via a --config flag; otherwise
    // it defaults to "config.toml". A missing default file is not an error:
    // the server starts with its built-in defaults.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let mut config = match config_path {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{path}\": {e}");
                std::process::exit(1);
            }
        },
        None => match Config::from_file("config.toml") {
            Ok(cfg) => cfg,
            Err(_) => Config::default(),
        },
    };

    // Override the port if provided as a command-line argument.
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).and_then(|p| p.parse::<u16>().ok()) {
            Some(port) => config.port = port,
            None => {
                eprintln!("--port flag requires a valid port number");
                std::process::exit(1);
            }
        }
    }

    let log_filter =
        env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter))
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
