// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::client::*;
use super::persistence::PersistenceState;
use super::replication::{ReplicaStateInfo, ReplicationState};
use super::stats::StatsState;
use crate::config::Config;
use crate::core::CitrineError;
use crate::core::events::{EventBus, PropagatedWork};
use crate::core::replication::backlog::ReplicationBacklog;
use crate::core::replication::script_cache::ReplicatedScriptCache;
use crate::core::replication::snapshot::SyncCoordinator;
use crate::core::scripting::ScriptRegistry;
use crate::core::storage::Db;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, broadcast, mpsc, watch};

/// Contains all initialized components required to spawn the server's background tasks.
/// This struct is created once during server initialization and then consumed by the spawner.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// Receives events for the AOF writer task, if AOF is enabled.
    pub aof_event_rx: Option<mpsc::Receiver<PropagatedWork>>,
    /// Receives requests to rebuild the AOF from the live dataset.
    pub aof_rewrite_request_rx: Option<mpsc::Receiver<()>>,
    /// A broadcast channel to signal the replication supervisor to reconfigure
    /// (role changed at runtime).
    pub replication_reconfigure_rx: broadcast::Receiver<()>,
}

/// The central struct holding all shared, server-wide state.
/// This struct is wrapped in an `Arc` and passed to nearly every task and
/// connection handler, providing a single source of truth for the server's
/// configuration and dynamic state.
#[derive(Debug)]
pub struct ServerState {
    /// A vector of all logical databases.
    pub dbs: Vec<Arc<Db>>,
    /// A map of all active client connections, keyed by a unique session ID.
    /// Stores client metadata and a shutdown sender for targeted connection
    /// termination.
    pub clients: ClientMap,
    /// The server's runtime configuration, wrapped in a Mutex to allow role
    /// changes via `REPLICAOF`.
    pub config: Arc<Mutex<Config>>,
    /// The central event bus that propagates write commands to the AOF and
    /// replication subsystems.
    pub event_bus: Arc<EventBus>,
    /// The digest-addressed script registry backing EVAL/EVALSHA.
    pub scripting: Arc<ScriptRegistry>,
    /// A circular byte buffer storing the recent replication stream for
    /// partial resynchronization.
    pub replication_backlog: ReplicationBacklog,
    /// A receiver that gets notified whenever this node's replication offset
    /// advances.
    pub replication_offset_receiver: watch::Receiver<u64>,
    /// A sender to signal the replication supervisor to reconfigure.
    pub replication_reconfigure_tx: broadcast::Sender<()>,
    /// A map storing the runtime state of all connected replicas.
    pub replica_states: Arc<DashMap<SocketAddr, ReplicaStateInfo>>,
    /// Coordinates snapshot production so concurrent full resyncs share one
    /// snapshot.
    pub sync_coordinator: SyncCoordinator,
    /// Digests of scripts every connected replica is known to hold.
    pub replicated_scripts: ReplicatedScriptCache,
    /// Process start time, for `INFO`.
    pub start_time: Instant,
    /// Write/apply paths hold this for reading around execute-then-publish;
    /// the snapshot coordinator holds it for writing while capturing the
    /// dataset and its stream offset, making the pair a consistent cut.
    pub write_pause: tokio::sync::RwLock<()>,

    // --- Sub-State Structs ---
    /// Holds all state related to persistence (AOF/CTDB).
    pub persistence: PersistenceState,
    /// Holds all state related to replication (roles, offsets, run id).
    pub replication: ReplicationState,
    /// Holds all server-wide statistics.
    pub stats: StatsState,
}

impl ServerState {
    /// Initializes the entire server state from the given configuration.
    /// This is the main factory function for creating the server's shared context.
    pub fn initialize(config: Config) -> Result<ServerInit, CitrineError> {
        // Generate a unique run id for this server instance, used for replication.
        let run_id = ReplicationState::generate_run_id()?;

        let (event_bus, aof_event_rx) = EventBus::new(config.persistence.aof_enabled);
        let (replication_backlog, replication_offset_receiver) = ReplicationBacklog::new();
        let (replication_reconfigure_tx, replication_reconfigure_rx) = broadcast::channel(4);

        let (aof_rewrite_request_tx, aof_rewrite_request_rx) = if config.persistence.aof_enabled {
            let (tx, rx) = mpsc::channel(4);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        // Initialize all databases.
        let dbs = (0..config.databases).map(|_| Arc::new(Db::new())).collect();

        let state = Arc::new(Self {
            dbs,
            clients: Arc::new(DashMap::new()),
            config: Arc::new(Mutex::new(config)),
            event_bus: Arc::new(event_bus),
            scripting: Arc::new(ScriptRegistry::new()),
            replication_backlog,
            replication_offset_receiver,
            replication_reconfigure_tx,
            replica_states: Arc::new(DashMap::new()),
            sync_coordinator: SyncCoordinator::new(),
            replicated_scripts: ReplicatedScriptCache::new(),
            start_time: Instant::now(),
            write_pause: tokio::sync::RwLock::new(()),
            persistence: PersistenceState::new(aof_rewrite_request_tx),
            replication: ReplicationState::new(run_id),
            stats: StatsState::new(),
        });

        Ok(ServerInit {
            state,
            aof_event_rx,
            aof_rewrite_request_rx,
            replication_reconfigure_rx,
        })
    }

    /// Retrieves a reference to a specific database by its index.
    pub fn get_db(&self, db_index: usize) -> Option<Arc<Db>> {
        self.dbs.get(db_index).cloned()
    }

    /// Clears every logical database. Used when a full resynchronization
    /// replaces the dataset and on critical replication failures.
    pub fn flush_all_dbs(&self) {
        for db in &self.dbs {
            db.clear();
        }
    }

    /// Sends the kill signal to a connection by session id. Returns false if
    /// the session is unknown.
    pub fn kill_session(&self, session_id: u64) -> bool {
        if let Some(entry) = self.clients.get(&session_id) {
            let (_, shutdown_tx) = entry.value();
            return shutdown_tx.send(()).is_ok();
        }
        false
    }

    /// Terminates every connected replica session. Their next connection will
    /// resynchronize against whatever this node has become.
    pub fn disconnect_all_replicas(&self) {
        for entry in self.replica_states.iter() {
            self.kill_session(entry.value().session_id);
        }
    }
}
