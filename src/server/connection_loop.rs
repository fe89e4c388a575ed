// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::persistence::ctdb;
use crate::core::state::{ClientInfo, ClientRole};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for SIGINT or SIGTERM.
#[cfg(unix)]
async fn await_shutdown_signal() {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register SIGINT handler: {e}");
            std::future::pending::<()>().await;
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}

#[cfg(not(unix))]
async fn await_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Ctrl-C received, initiating graceful shutdown.");
    }
}

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal() => {
                break;
            },

            // Monitor background tasks for unexpected termination.
            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("A background task has completed."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            // Accept new incoming TCP connections.
            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new connection from: {}", addr);
                        ctx.state.stats.increment_total_connections();

                        session_id_counter = session_id_counter.wrapping_add(1);
                        let session_id = session_id_counter;
                        let state_clone = ctx.state.clone();

                        let (conn_shutdown_tx, conn_shutdown_rx) = broadcast::channel(1);
                        let global_shutdown_rx = ctx.shutdown_tx.subscribe();

                        let client_info = Arc::new(Mutex::new(ClientInfo {
                            addr,
                            session_id,
                            db_index: 0,
                            role: ClientRole::Normal,
                            created: Instant::now(),
                            last_command_time: Instant::now(),
                        }));
                        state_clone.clients.insert(session_id, (client_info, conn_shutdown_tx));

                        client_tasks.spawn(async move {
                            let mut handler = ConnectionHandler::new(
                                socket, addr, state_clone, session_id,
                                conn_shutdown_rx, global_shutdown_rx,
                            ).await;
                            if let Err(e) = handler.run().await {
                                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            // Reap completed client tasks.
            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    // --- Graceful Shutdown Sequence ---
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }

    client_tasks.shutdown().await;
    info!("All client connections closed.");

    let (ctdb_enabled, ctdb_path, aof_enabled, dirty_keys) = {
        let config = ctx.state.config.lock().await;
        (
            config.persistence.ctdb_enabled,
            config.persistence.ctdb_path.clone(),
            config.persistence.aof_enabled,
            ctx.state
                .persistence
                .dirty_keys_counter
                .load(Ordering::Relaxed),
        )
    };

    // Perform a final snapshot save if it's the only persistence method and
    // there are unsaved changes.
    if ctdb_enabled && !aof_enabled && dirty_keys > 0 {
        info!(
            "Performing final snapshot save on shutdown ({} dirty keys)...",
            dirty_keys
        );
        match ctdb::save_to_file(&ctdb_path, &ctx.state.dbs).await {
            Ok(()) => info!("Final snapshot save completed successfully."),
            Err(e) => error!("CRITICAL: Final snapshot save on shutdown failed: {}", e),
        }
    }

    // Wait for all background tasks to terminate, with a timeout.
    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }
    info!("Server shutdown complete.");
}
