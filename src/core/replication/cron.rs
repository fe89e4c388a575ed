// src/core/replication/cron.rs

//! The once-per-second replication housekeeping task.
//!
//! Primary-side duties: ping online replicas through the stream, reap
//! sessions whose acks dried up, release the backlog after a configurable
//! replica-free period, flush the replicated-script cache when nothing
//! depends on it anymore, and recompute the good-replica count backing the
//! min-replicas write policy.
//!
//! Replica-side timers (handshake deadlines, transfer inactivity, reconnect
//! backoff, periodic acks) live with the replica worker, which owns the
//! sockets they guard.

use crate::core::Command;
use crate::core::commands::generic::Ping;
use crate::core::events::PropagatedWork;
use crate::core::state::{ReplicaSyncState, ServerState};
use crate::config::ReplicationConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

const CRON_PERIOD: Duration = Duration::from_secs(1);

pub struct ReplicationCron {
    state: Arc<ServerState>,
}

impl ReplicationCron {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Replication cron task started.");
        let mut interval = tokio::time::interval(CRON_PERIOD);
        let mut last_ping = Instant::now();
        let mut replica_free_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&mut last_ping, &mut replica_free_since).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Replication cron shutting down.");
                    return;
                }
            }
        }
    }

    async fn tick(&self, last_ping: &mut Instant, replica_free_since: &mut Option<Instant>) {
        let (tuning, aof_enabled, min_replicas_max_lag) = {
            let config = self.state.config.lock().await;
            let max_lag = match &config.replication {
                ReplicationConfig::Primary(primary) => primary.min_replicas_max_lag,
                _ => 10,
            };
            (
                config.replication_tuning.clone(),
                config.persistence.aof_enabled,
                max_lag,
            )
        };

        let has_replicas = !self.state.replica_states.is_empty();

        // Ping online replicas through the ordinary stream. The frame
        // advances the stream offset like any other, so acks keep moving
        // even on an otherwise idle primary. Sessions still waiting on a
        // snapshot keep their peers alive with their own newline writes.
        if has_replicas && last_ping.elapsed() >= tuning.ping_period {
            *last_ping = Instant::now();
            self.state.event_bus.publish(PropagatedWork {
                db_index: 0,
                command: Command::Ping(Ping::default()),
            });
        }

        // Reap online replicas whose acks stopped. Legacy SYNC replicas
        // never ack and are exempt.
        for entry in self.state.replica_states.iter() {
            let info = entry.value();
            if info.sync_state == ReplicaSyncState::Online
                && info.supports_psync
                && info.last_ack_time.elapsed() > tuning.repl_timeout
            {
                warn!(
                    "Disconnecting timed-out replica {} (last ack {:?} ago).",
                    entry.key(),
                    info.last_ack_time.elapsed()
                );
                self.state.kill_session(info.session_id);
            }
        }

        // Release the backlog once it has sat unused long enough. A zero
        // TTL keeps it forever.
        if has_replicas {
            *replica_free_since = None;
        } else if self.state.replication_backlog.is_active().await {
            let since = replica_free_since.get_or_insert_with(Instant::now);
            if !tuning.backlog_ttl.is_zero() && since.elapsed() >= tuning.backlog_ttl {
                info!(
                    "No replicas for {:?}; releasing the replication backlog.",
                    since.elapsed()
                );
                self.state.replication_backlog.deactivate().await;
                *replica_free_since = None;
            }
        }

        // With no replicas and no durable log, the replicated-script cache
        // protects nothing.
        if !has_replicas && !aof_enabled && !self.state.replicated_scripts.is_empty().await {
            self.state.replicated_scripts.clear().await;
        }

        self.state.replication.recompute_good_replicas(
            &self.state.replica_states,
            Duration::from_secs(min_replicas_max_lag),
        );
    }
}
