// src/core/replication/propagator.rs

//! The propagator turns write commands into replication stream bytes.
//!
//! It is the only task that appends to the backlog, which gives the stream a
//! single total order: the order commands are published on the event bus is
//! the order their frames land in the backlog and therefore the order every
//! replica observes them. Streaming sessions are woken through the backlog's
//! offset notifier and serve themselves the new bytes.

use crate::core::Command;
use crate::core::CitrineError;
use crate::core::commands::generic::Select;
use crate::core::events::PropagatedWork;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::state::ServerState;
use bytes::BytesMut;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use tokio_util::codec::Encoder;
use tracing::{error, info, warn};

/// Encodes one unit of work as stream frames, prefixing a `SELECT` frame
/// whenever the logical database changes. `PING` keepalives are
/// database-agnostic and never force a `SELECT`.
pub fn encode_stream_work(
    selected_db: &mut i64,
    db_index: usize,
    command: &Command,
) -> Result<BytesMut, CitrineError> {
    let mut out = BytesMut::new();
    let mut codec = RespFrameCodec;

    let needs_select =
        !matches!(command, Command::Ping(_)) && *selected_db != db_index as i64;
    if needs_select {
        let select: RespFrame = Command::Select(Select { db_index }).into();
        codec.encode(select, &mut out)?;
        *selected_db = db_index as i64;
    }
    codec.encode(command.clone().into(), &mut out)?;
    Ok(out)
}

/// Consumes the write-event bus and feeds the backlog.
pub struct Propagator {
    state: Arc<ServerState>,
    selected_db: i64,
}

impl Propagator {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            selected_db: -1,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut event_rx = self.state.event_bus.subscribe_for_replication();
        info!("Replication propagator task is running.");

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    match result {
                        Ok(work) => {
                            self.feed(work).await;
                            self.state.event_bus.mark_processed(1);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Skipped commands never reached the backlog, so
                            // attached replicas silently diverged. Force them
                            // back through a full resync.
                            warn!(
                                "Replication propagator lagged; {} write events were dropped. \
                                 Disconnecting all replicas to force a full resync.",
                                n
                            );
                            self.state.disconnect_all_replicas();
                            self.state.event_bus.mark_processed(n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus channel closed. Replication propagator shutting down.");
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Replication propagator shutting down.");
                    return;
                }
            }
        }
    }

    async fn feed(&mut self, work: PropagatedWork) {
        // Without a backlog there is nothing to feed and nobody to notice the
        // offset advancing; the stream only exists while replicas do.
        if !self.state.replication_backlog.is_active().await {
            self.selected_db = -1;
            return;
        }

        match encode_stream_work(&mut self.selected_db, work.db_index, &work.command) {
            Ok(bytes) => {
                if let Some(end_offset) = self.state.replication_backlog.append(&bytes).await {
                    self.state
                        .replication
                        .master_repl_offset
                        .store(end_offset, Ordering::SeqCst);
                }
            }
            Err(e) => {
                error!(
                    "Failed to encode '{}' for replication: {}. Command was not propagated.",
                    work.command.name(),
                    e
                );
            }
        }
    }
}
