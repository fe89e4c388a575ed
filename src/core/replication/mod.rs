// src/core/replication/mod.rs

//! This module orchestrates the replication subsystem.
//!
//! The supervisor spawned here watches the server's role: while the node is a
//! replica it drives a `ReplicaWorker` against the configured primary, and
//! whenever the role changes at runtime (`REPLICAOF`) it tears the worker
//! down and re-evaluates. The propagator and the cron task run regardless of
//! role, since even a replica acts as a primary toward chained replicas.

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

pub mod backlog;
pub mod cron;
pub mod handler;
pub mod propagator;
pub mod roles;
pub mod script_cache;
pub mod snapshot;
pub mod worker;

/// Runs the role supervisor until shutdown.
pub async fn run_supervisor(
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut reconfigure_rx: broadcast::Receiver<()>,
) {
    info!("Replication supervisor started.");
    loop {
        let is_replica = state.config.lock().await.replication.is_replica();

        if is_replica {
            let worker = worker::ReplicaWorker::new(state.clone());
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Replication supervisor shutting down.");
                    return;
                }
                // The worker only returns once the role is no longer replica.
                _ = worker.run(reconfigure_rx.resubscribe()) => {}
            }
        } else {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Replication supervisor shutting down.");
                    return;
                }
                _ = reconfigure_rx.recv() => {
                    info!("Replication supervisor observed a role change.");
                }
            }
        }
    }
}
