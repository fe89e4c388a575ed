// src/core/state/replication.rs

//! Contains state definitions related to replication.

use crate::config::ReplicationConfig;
use crate::core::CitrineError;
use crate::core::state::ServerState;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The synchronization state of a replica session on the primary side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSyncState {
    /// Attached, but no compatible snapshot could be joined yet (one that
    /// this session may not reuse is still being produced).
    WaitSnapshotStart,
    /// Waiting for the in-flight snapshot this session is attached to.
    WaitSnapshotEnd,
    /// The snapshot payload is being written to the socket.
    SendSnapshot,
    /// Fully synchronized and receiving the live stream.
    Online,
}

impl ReplicaSyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaSyncState::WaitSnapshotStart => "wait_snapshot_start",
            ReplicaSyncState::WaitSnapshotEnd => "wait_snapshot_end",
            ReplicaSyncState::SendSnapshot => "send_snapshot",
            ReplicaSyncState::Online => "online",
        }
    }
}

/// Runtime information about a replica connected to this primary.
#[derive(Debug, Clone)]
pub struct ReplicaStateInfo {
    /// The session id of the underlying connection, used to address its kill
    /// channel in the client map.
    pub session_id: u64,
    /// The current synchronization state of the replica.
    pub sync_state: ReplicaSyncState,
    /// The last replication offset acknowledged by the replica.
    pub ack_offset: u64,
    /// The timestamp of the last acknowledgment (or other sign of life)
    /// received from the replica.
    pub last_ack_time: Instant,
    /// The service port the replica advertised via `REPLCONF listening-port`.
    pub listening_port: Option<u16>,
    /// False for pre-PSYNC replicas that attached via the legacy `SYNC`
    /// command. Such replicas never send acks, so they are exempt from the
    /// ack-timeout reaper.
    pub supports_psync: bool,
}

/// The coordinates of a primary as seen from a replica: the identity of its
/// stream and how far into that stream this node has processed.
#[derive(Debug, Default, Clone)]
pub struct PrimaryInfo {
    pub run_id: String,
    pub processed_offset: u64,
}

/// The observable state of the link to the primary, for `INFO` and `ROLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryLinkState {
    Connect,
    Connecting,
    Transfer,
    Connected,
}

impl PrimaryLinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryLinkState::Connect => "connect",
            PrimaryLinkState::Connecting => "connecting",
            PrimaryLinkState::Transfer => "sync",
            PrimaryLinkState::Connected => "connected",
        }
    }
}

/// The central struct holding all replication-related state.
#[derive(Debug)]
pub struct ReplicationState {
    /// The identity of this node's replication stream. Changes when the node
    /// is promoted, which invalidates every offset a peer remembered.
    run_id: Mutex<String>,
    /// The replication offset of this node acting as a stream producer.
    pub master_repl_offset: AtomicU64,
    /// The active primary session, when this node is a replica with a live or
    /// establishing link. `None` on primaries.
    pub primary_info: Mutex<Option<PrimaryInfo>>,
    /// A primary whose link was lost, preserved so the next handshake can
    /// attempt an incremental resumption. Discarded once resumption succeeds
    /// or a full resync replaces the dataset.
    pub cached_primary: Mutex<Option<PrimaryInfo>>,
    /// Where the replica-side session currently is in its lifecycle.
    pub link_state: Mutex<PrimaryLinkState>,
    /// The service ports advertised by not-yet-promoted replica connections.
    pub announced_ports: DashMap<SocketAddr, u16>,
    /// Count of replicas that are online and acking within the configured
    /// lag bound, recomputed once per second by the replication cron.
    pub good_replicas: AtomicUsize,
}

impl ReplicationState {
    /// Creates a new `ReplicationState` with a fresh run id.
    pub fn new(run_id: String) -> Self {
        Self {
            run_id: Mutex::new(run_id),
            master_repl_offset: AtomicU64::new(0),
            primary_info: Mutex::new(None),
            cached_primary: Mutex::new(None),
            link_state: Mutex::new(PrimaryLinkState::Connect),
            announced_ports: DashMap::new(),
            good_replicas: AtomicUsize::new(0),
        }
    }

    /// Generates a fresh 40-character run id.
    pub fn generate_run_id() -> Result<String, CitrineError> {
        let mut bytes = [0u8; 20];
        getrandom::fill(&mut bytes).map_err(|e| CitrineError::Internal(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    pub async fn run_id(&self) -> String {
        self.run_id.lock().await.clone()
    }

    /// Installs a new stream identity. Every offset handed out under the old
    /// id becomes unresumable.
    pub async fn reset_run_id(&self, new_id: String) {
        *self.run_id.lock().await = new_id;
    }

    /// Atomically gets the current replication offset.
    pub fn get_replication_offset(&self) -> u64 {
        self.master_repl_offset.load(Ordering::SeqCst)
    }

    pub async fn set_link_state(&self, state: PrimaryLinkState) {
        *self.link_state.lock().await = state;
    }

    pub async fn get_link_state(&self) -> PrimaryLinkState {
        *self.link_state.lock().await
    }

    /// Checks if a write command should be allowed based on the
    /// `min_replicas_to_write` policy. Uses the good-replica count maintained
    /// by the replication cron.
    pub async fn check_min_replicas_policy(
        &self,
        server_state: &Arc<ServerState>,
    ) -> Result<(), CitrineError> {
        let config = server_state.config.lock().await;
        if let ReplicationConfig::Primary(primary_config) = &config.replication {
            let min_replicas = primary_config.min_replicas_to_write;
            if min_replicas == 0 {
                return Ok(());
            }
            drop(config);

            let good = self.good_replicas.load(Ordering::Relaxed);
            if good < min_replicas {
                return Err(CitrineError::ReadOnly(format!(
                    "NOREPLICAS Not enough good replicas to write (have {good}, need {min_replicas})"
                )));
            }
        }
        Ok(())
    }

    /// Recomputes the number of replicas that are online and acking within
    /// the allowed lag window.
    pub fn recompute_good_replicas(
        &self,
        replica_states: &DashMap<SocketAddr, ReplicaStateInfo>,
        max_lag: Duration,
    ) {
        let good = replica_states
            .iter()
            .filter(|entry| {
                entry.value().sync_state == ReplicaSyncState::Online
                    && entry.value().last_ack_time.elapsed() <= max_lag
            })
            .count();
        self.good_replicas.store(good, Ordering::Relaxed);
    }
}
