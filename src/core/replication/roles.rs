// src/core/replication/roles.rs

//! Role transitions: standalone ↔ replica ↔ primary.
//!
//! A node that starts following a new primary must tear down everything that
//! depended on its previous stream identity: its own replicas (they have to
//! resync against whatever this node becomes), the backlog (chained replicas
//! must not resume against a dataset about to be replaced), and the
//! replicated-script bookkeeping. A node promoted to standalone gets a fresh
//! run id, so stale peers cannot resume against its new stream.

use crate::config::{ReplicationConfig, ReplicationPrimaryConfig};
use crate::core::CitrineError;
use crate::core::state::{PrimaryLinkState, ReplicationState, ServerState};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::info;

/// `REPLICAOF host port`: demote this node to a replica of the given primary.
pub async fn become_replica_of(
    state: &Arc<ServerState>,
    host: String,
    port: u16,
) -> Result<(), CitrineError> {
    info!("Reconfiguring as a replica of {}:{}.", host, port);

    {
        let mut config = state.config.lock().await;
        // A runtime demotion keeps any previously configured credentials.
        let primary_auth = match &config.replication {
            ReplicationConfig::Replica { primary_auth, .. } => primary_auth.clone(),
            _ => None,
        };
        config.replication = ReplicationConfig::Replica {
            primary_host: host,
            primary_port: port,
            primary_auth,
        };
    }

    // The new primary's dataset will replace ours; nothing downstream of the
    // old identity may survive.
    *state.replication.primary_info.lock().await = None;
    *state.replication.cached_primary.lock().await = None;
    state
        .replication
        .set_link_state(PrimaryLinkState::Connect)
        .await;
    state.disconnect_all_replicas();
    state.replication_backlog.deactivate().await;
    state.replicated_scripts.clear().await;

    let _ = state.replication_reconfigure_tx.send(());
    Ok(())
}

/// `REPLICAOF NO ONE`: promote this node back to a standalone primary.
pub async fn become_standalone(state: &Arc<ServerState>) -> Result<(), CitrineError> {
    let was_replica = {
        let config = state.config.lock().await;
        config.replication.is_replica()
    };
    if !was_replica {
        return Ok(());
    }

    {
        let mut config = state.config.lock().await;
        config.replication = ReplicationConfig::Primary(ReplicationPrimaryConfig::default());
    }

    let inherited = {
        let mut active = state.replication.primary_info.lock().await;
        let mut cached = state.replication.cached_primary.lock().await;
        active.take().or_else(|| cached.take())
    };

    // With no replicas of our own, the last processed primary offset is the
    // honest description of how fresh this dataset is; downstream observers
    // can compare it. With chained replicas attached, our own stream offset
    // space is already live and must not jump.
    if state.replica_states.is_empty()
        && let Some(info) = &inherited
    {
        state
            .replication
            .master_repl_offset
            .store(info.processed_offset, Ordering::SeqCst);
    }

    let new_run_id = ReplicationState::generate_run_id()?;
    state.replication.reset_run_id(new_run_id.clone()).await;
    state
        .replication
        .set_link_state(PrimaryLinkState::Connect)
        .await;

    let _ = state.replication_reconfigure_tx.send(());
    info!(
        "Promoted to primary (run id {}, stream offset {}).",
        new_run_id,
        state.replication.get_replication_offset()
    );
    Ok(())
}

/// Moves the active primary session into the cached slot after a link loss,
/// preserving the stream coordinates for an incremental resumption attempt.
pub async fn cache_active_primary(state: &Arc<ServerState>) {
    let taken = state.replication.primary_info.lock().await.take();
    if let Some(info) = taken {
        info!(
            "Primary link lost at offset {}; caching session for partial resync.",
            info.processed_offset
        );
        *state.replication.cached_primary.lock().await = Some(info);
    }
}
