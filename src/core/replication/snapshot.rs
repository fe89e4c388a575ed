// src/core/replication/snapshot.rs

//! Coordinates snapshot production for full resynchronization.
//!
//! Any number of replica sessions may request a full resync at once, but at
//! most one snapshot is serialized at a time. Sessions arriving while one is
//! being produced attach to it and all receive the same `(offset, payload)`
//! pair; catch-up past the snapshot offset is later served from the backlog,
//! which hands every session the identical byte sequence.
//!
//! A session arriving while a persistence-initiated save (SAVE/BGSAVE) is
//! running cannot share that file; it keeps waiting in the snapshot-start
//! state and is picked up when the next replication snapshot begins.

use crate::core::Command;
use crate::core::commands::generic::{Script, ScriptSubcommand};
use crate::core::events::PropagatedWork;
use crate::core::persistence::ctdb;
use crate::core::state::ServerState;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{Mutex, watch};
use tracing::info;

/// Progress of an in-flight snapshot, published over a `watch` channel.
#[derive(Debug, Clone)]
pub enum SnapshotPhase {
    Pending,
    Done(Result<Bytes, String>),
}

/// The result of asking the coordinator for a full-resync snapshot.
pub enum AttachOutcome {
    /// The session is attached to a snapshot that reflects the dataset at
    /// `offset`; completion arrives on `done_rx`.
    Attached {
        offset: u64,
        done_rx: watch::Receiver<SnapshotPhase>,
    },
    /// An incompatible save is running; retry after it finishes.
    Busy,
}

#[derive(Debug)]
struct InFlightSnapshot {
    offset: u64,
    done_rx: watch::Receiver<SnapshotPhase>,
}

/// Serializes replication snapshot production across sessions.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    in_flight: Mutex<Option<InFlightSnapshot>>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the calling session to the current replication snapshot,
    /// starting one if none is in flight.
    ///
    /// The snapshot offset is captured before serialization begins; the
    /// FULLRESYNC reply must carry this value so the replica's processed
    /// offset matches the dataset it is about to load.
    pub async fn attach(&self, state: &Arc<ServerState>) -> AttachOutcome {
        let mut guard = self.in_flight.lock().await;

        if let Some(in_flight) = guard.as_ref() {
            return AttachOutcome::Attached {
                offset: in_flight.offset,
                done_rx: in_flight.done_rx.clone(),
            };
        }

        if state
            .persistence
            .is_saving_snapshot
            .load(Ordering::Acquire)
        {
            return AttachOutcome::Busy;
        }

        // Pause command propagation while the stream offset and the dataset
        // are captured together. Execute-and-publish pairs hold the read
        // side, so none is in flight once the write side is held; draining
        // the propagator then brings the stream offset up to date with every
        // already-published write. Anything executed after this cut lands at
        // an offset past the snapshot and reaches the replica via catch-up.
        let (offset, collected) = {
            let _pause = state.write_pause.write().await;
            while !state.event_bus.is_drained() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            (
                state.replication.get_replication_offset(),
                ctdb::collect_entries(&state.dbs),
            )
        };

        let (done_tx, done_rx) = watch::channel(SnapshotPhase::Pending);
        *guard = Some(InFlightSnapshot {
            offset,
            done_rx: done_rx.clone(),
        });
        drop(guard);

        info!(
            "Starting replication snapshot at stream offset {}.",
            offset
        );

        let producer_state = state.clone();
        tokio::spawn(async move {
            // Every replica attached to this snapshot resolves scripts from
            // scratch, so nothing can be assumed replicated anymore. The
            // registered bodies are re-shipped through the ordinary stream,
            // where their bytes are offset-accounted like any other frame.
            producer_state.replicated_scripts.clear().await;
            for (digest, body) in producer_state.scripting.all_scripts() {
                producer_state.event_bus.publish(PropagatedWork {
                    db_index: 0,
                    command: Command::Script(Script {
                        subcommand: ScriptSubcommand::Load(body),
                    }),
                });
                producer_state.replicated_scripts.insert(&digest).await;
            }

            let payload = ctdb::encode_image(&collected);
            let _ = done_tx.send(SnapshotPhase::Done(Ok(payload)));
            *producer_state.sync_coordinator.in_flight.lock().await = None;
        });

        AttachOutcome::Attached { offset, done_rx }
    }
}
