// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use crate::core::persistence::AofWriterTask;
use crate::core::replication;
use crate::core::replication::cron::ReplicationCron;
use crate::core::replication::propagator::Propagator;
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    let server_init = ctx
        .init_channels
        .take()
        .ok_or_else(|| anyhow!("server init channels already consumed"))?;

    let aof_enabled = server_state.config.lock().await.persistence.aof_enabled;

    // --- Durable logging ---
    if aof_enabled {
        let event_rx = server_init
            .aof_event_rx
            .ok_or_else(|| anyhow!("AOF receiver must exist when AOF is enabled"))?;
        let rewrite_rx = server_init
            .aof_rewrite_request_rx
            .ok_or_else(|| anyhow!("AOF rewrite receiver must exist when AOF is enabled"))?;
        let writer = AofWriterTask::new(server_state.clone(), event_rx, rewrite_rx).await?;
        let shutdown_rx_aof = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            writer.run(shutdown_rx_aof).await;
            Ok(())
        });
    }

    // --- Replication ---
    let propagator = Propagator::new(server_state.clone());
    let shutdown_rx_prop = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        propagator.run(shutdown_rx_prop).await;
        Ok(())
    });

    let cron = ReplicationCron::new(server_state.clone());
    let shutdown_rx_cron = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        cron.run(shutdown_rx_cron).await;
        Ok(())
    });

    let supervisor_state = server_state.clone();
    let shutdown_rx_repl = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        replication::run_supervisor(
            supervisor_state,
            shutdown_rx_repl,
            server_init.replication_reconfigure_rx,
        )
        .await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
