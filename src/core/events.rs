// src/core/events.rs

//! Defines the event bus system for propagating write operations to persistence
//! and replication subsystems.

use crate::core::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{
    broadcast::{self, Sender as BroadcastSender},
    mpsc::{self, Sender as MpscSender, error::TrySendError},
};
use tracing::{debug, error};

/// The capacity of the broadcast channel for replication.
/// This should be large enough to handle bursts of commands without lagging.
const BROADCAST_BUS_CAPACITY: usize = 16384;

/// The capacity of the MPSC channel for AOF persistence.
/// This is very large to ensure that even if disk I/O is slow, the server
/// does not block or reject write commands.
const AOF_CHANNEL_CAPACITY: usize = 65536;

/// A unit of work to be applied to the durable log and every replica: one
/// command together with the logical database it executed against. The
/// consumers re-frame it with `SELECT` commands as the database changes.
#[derive(Debug, Clone)]
pub struct PropagatedWork {
    pub db_index: usize,
    pub command: Command,
}

/// The `EventBus` is the central distribution hub for all write operations.
/// It sends work units to the AOF writer and to the replication propagator.
///
/// The published/processed sequence pair lets the snapshot coordinator drain
/// the propagator: once they are equal, every work published so far has been
/// appended to the backlog, so the stream offset and the dataset can be read
/// as one consistent cut.
#[derive(Debug)]
pub struct EventBus {
    /// A broadcast sender for replication (one-to-many).
    replication_sender: BroadcastSender<PropagatedWork>,
    /// An MPSC sender for AOF persistence (one-to-one).
    aof_sender: Option<MpscSender<PropagatedWork>>,
    /// Count of work units handed to the replication propagator.
    published_seq: AtomicU64,
    /// Count of work units the propagator has finished handling.
    processed_seq: AtomicU64,
}

impl EventBus {
    /// Creates a new `EventBus` and returns the receiver for the AOF task.
    pub fn new(aof_enabled: bool) -> (Self, Option<mpsc::Receiver<PropagatedWork>>) {
        let (replication_sender, _) = broadcast::channel(BROADCAST_BUS_CAPACITY);

        let (aof_sender, aof_receiver) = if aof_enabled {
            let (tx, rx) = mpsc::channel(AOF_CHANNEL_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let bus = Self {
            replication_sender,
            aof_sender,
            published_seq: AtomicU64::new(0),
            processed_seq: AtomicU64::new(0),
        };

        (bus, aof_receiver)
    }

    /// Publishes a work unit to all subscribers (AOF and replication).
    pub fn publish(&self, work: PropagatedWork) {
        // Send to replication subscribers. It's okay if there are no active subscribers.
        if self.replication_sender.send(work.clone()).is_err() {
            debug!("Published a work unit with no active replication subscribers.");
        } else {
            self.published_seq.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(sender) = &self.aof_sender {
            match sender.try_send(work) {
                Ok(_) => {}
                Err(TrySendError::Full(_)) => {
                    error!("AOF channel is full. Persistence is lagging behind writes.");
                }
                Err(TrySendError::Closed(_)) => {
                    error!("AOF channel is closed. Persistence has stopped.");
                }
            }
        }
    }

    /// Provides a new receiver for a replication task to subscribe to updates.
    pub fn subscribe_for_replication(&self) -> broadcast::Receiver<PropagatedWork> {
        self.replication_sender.subscribe()
    }

    /// Called by the propagator after it finishes handling `count` work units
    /// (including units dropped by channel lag).
    pub fn mark_processed(&self, count: u64) {
        self.processed_seq.fetch_add(count, Ordering::SeqCst);
    }

    /// True when the propagator has caught up with everything published.
    pub fn is_drained(&self) -> bool {
        self.processed_seq.load(Ordering::SeqCst) >= self.published_seq.load(Ordering::SeqCst)
    }
}
