// src/server/initialization.rs

//! Handles the complete server initialization process, from state setup to
//! persistence loading and socket binding.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::persistence::{AofLoader, CtdbLoader};
use crate::core::state::ServerState;
use anyhow::{Result, anyhow};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let server_init = ServerState::initialize(config.clone())?;
    let server_state = server_init.state.clone();
    info!("Server state initialized.");

    match &config.replication {
        crate::config::ReplicationConfig::Primary(_) => {
            info!("Server starting in PRIMARY mode.");
        }
        crate::config::ReplicationConfig::Replica {
            primary_host,
            primary_port,
            ..
        } => {
            info!(
                "Server starting in REPLICA mode, following {}:{}.",
                primary_host, primary_port
            );
        }
    }

    load_persistence_data(&server_state).await?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| anyhow!("Failed to bind {}:{}: {e}", config.host, config.port))?;
    info!(
        "CitrineDB server listening on {}:{}",
        config.host, config.port
    );

    Ok(ServerContext {
        state: server_state,
        init_channels: Some(server_init),
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Loads data from the AOF or the CTDB snapshot based on the configuration.
/// The AOF wins when both exist, since it is the more complete record.
async fn load_persistence_data(
    server_state: &std::sync::Arc<ServerState>,
) -> Result<()> {
    let config = server_state.config.lock().await.persistence.clone();

    if config.aof_enabled {
        let aof_loader = AofLoader::new(config);
        aof_loader.load_into(server_state).await?;
    } else if config.ctdb_enabled {
        let ctdb_loader = CtdbLoader::new(config);
        ctdb_loader.load_into(server_state).await?;
    } else {
        info!("No persistence method enabled. Starting with an empty state.");
    }
    info!("Persistence data loaded successfully.");
    Ok(())
}
