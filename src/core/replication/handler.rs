// src/core/replication/handler.rs

//! Handles an incoming connection from a replica that has sent a `PSYNC` (or
//! legacy `SYNC`) command.
//!
//! This handler is spawned by the `ConnectionHandler` when it detects the
//! command, effectively "handing off" the TCP stream. Its sole responsibility
//! is to manage the synchronization lifecycle for that single replica:
//!
//! - decide between a partial resynchronization (replay missed bytes from the
//!   backlog) and a full one (snapshot transfer),
//! - drive the session through the snapshot-wait, snapshot-send, and online
//!   states, emitting newline keepalives while the replica cannot yet parse
//!   frames,
//! - once online, serve the live stream out of the backlog and consume
//!   `REPLCONF ACK` frames arriving on the same socket.

use crate::core::replication::snapshot::{AttachOutcome, SnapshotPhase};
use crate::core::state::{ReplicaStateInfo, ReplicaSyncState, ServerState};
use crate::core::{CitrineError, Command};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// What the replica asked for when the connection was handed off.
#[derive(Debug, Clone)]
pub enum SyncRequest {
    /// `PSYNC <run_id|?> <offset|-1>`: try incremental first.
    Psync {
        replication_id: String,
        offset: String,
    },
    /// Legacy `SYNC`: unconditional full transfer, no offset bookkeeping.
    Legacy,
}

/// `ReplicaHandler` manages the synchronization and command streaming process
/// for a single connected replica.
pub struct ReplicaHandler {
    state: Arc<ServerState>,
    addr: SocketAddr,
    session_id: u64,
    stream: Option<TcpStream>,
}

impl ReplicaHandler {
    pub fn new(
        state: Arc<ServerState>,
        addr: SocketAddr,
        session_id: u64,
        stream: TcpStream,
    ) -> Self {
        Self {
            state,
            addr,
            session_id,
            stream: Some(stream),
        }
    }

    /// The main entry point for the replica handler task. Handles the entire
    /// lifecycle of the session, including cleanup of its registry entries.
    pub async fn run(mut self, request: SyncRequest, mut shutdown_rx: broadcast::Receiver<()>) {
        let sync_result = tokio::select! {
            biased; // Prioritize the kill signal.
            _ = shutdown_rx.recv() => {
                info!("Replica session for {} received kill signal. Aborting.", self.addr);
                Err(CitrineError::ReplicationError(
                    "session terminated by server".into(),
                ))
            }
            res = self.perform_sync_cycle(&request) => res,
        };

        match sync_result {
            Ok(()) => info!("Replica session for {} ended.", self.addr),
            Err(e) => warn!("Replica session for {} ended: {}", self.addr, e),
        }

        // The session owns its registry entries; nothing else removes them.
        self.state.replica_states.remove(&self.addr);
        self.state.replication.announced_ports.remove(&self.addr);
        self.state.clients.remove(&self.session_id);
    }

    async fn perform_sync_cycle(&mut self, request: &SyncRequest) -> Result<(), CitrineError> {
        let listening_port = self
            .state
            .replication
            .announced_ports
            .get(&self.addr)
            .map(|entry| *entry.value());

        self.state.replica_states.insert(
            self.addr,
            ReplicaStateInfo {
                session_id: self.session_id,
                sync_state: ReplicaSyncState::WaitSnapshotStart,
                ack_offset: 0,
                last_ack_time: Instant::now(),
                listening_port,
                supports_psync: matches!(request, SyncRequest::Psync { .. }),
            },
        );

        if let SyncRequest::Psync {
            replication_id,
            offset,
        } = request
        {
            info!(
                "Replica at {} requested sync with id '{}' and offset '{}'",
                self.addr, replication_id, offset
            );
            if let Some(resume_from) = self.partial_resync_offset(replication_id, offset).await {
                return self.do_partial_resync(resume_from).await;
            }
        } else {
            info!("Replica at {} requested a legacy full sync.", self.addr);
        }

        self.do_full_resync(matches!(request, SyncRequest::Psync { .. }))
            .await
    }

    /// Decides whether the claimed position allows an incremental resync: the
    /// stream identity must match and the offset must still be covered by the
    /// backlog window (resuming at exactly its oldest byte is fine).
    async fn partial_resync_offset(&self, claimed_id: &str, claimed_offset: &str) -> Option<u64> {
        let run_id = self.state.replication.run_id().await;
        if !claimed_id.eq_ignore_ascii_case(&run_id) {
            debug!(
                "Replica {} presented run id '{}' (ours is '{}'). Full resync required.",
                self.addr, claimed_id, run_id
            );
            return None;
        }
        let offset: u64 = claimed_offset.parse().ok()?;
        let (oldest, newest) = self.state.replication_backlog.span().await?;
        if offset < oldest || offset > newest {
            debug!(
                "Requested offset {} outside backlog window [{}, {}]. Full resync required.",
                offset, oldest, newest
            );
            return None;
        }
        Some(offset)
    }

    /// Sends `+CONTINUE` plus the missed backlog bytes, then streams live.
    async fn do_partial_resync(&mut self, resume_from: u64) -> Result<(), CitrineError> {
        info!(
            "Performing partial resync for replica {} from offset {}.",
            self.addr, resume_from
        );
        self.write_socket(b"+CONTINUE\r\n").await?;
        // The claim names the first missing byte; everything before it is
        // already processed on the replica's side.
        self.mark_online(resume_from.saturating_sub(1));
        self.stream_live_updates(resume_from).await
    }

    async fn do_full_resync(&mut self, announce: bool) -> Result<(), CitrineError> {
        let (backlog_capacity, ping_period, disable_nodelay) = {
            let config = self.state.config.lock().await;
            (
                config.replication_tuning.backlog_size,
                config.replication_tuning.ping_period,
                config.replication_tuning.disable_tcp_nodelay,
            )
        };

        // The backlog must exist before the snapshot offset is captured so
        // that catch-up bytes accumulate from that point on. Creation bumps
        // the offset; the bumped value is what FULLRESYNC reports.
        self.state
            .replication_backlog
            .ensure_active(backlog_capacity, &self.state.replication.master_repl_offset)
            .await;

        let mut keepalive = tokio::time::interval(ping_period);
        keepalive.tick().await; // The first tick completes immediately.

        // WAIT_SNAPSHOT_START: join the in-flight replication snapshot, or
        // keep the link alive until one can start.
        let (snapshot_offset, mut done_rx) = loop {
            match self.state.sync_coordinator.attach(&self.state).await {
                AttachOutcome::Attached { offset, done_rx } => break (offset, done_rx),
                AttachOutcome::Busy => {
                    tokio::select! {
                        _ = self.state.persistence.save_finished.notified() => {}
                        _ = keepalive.tick() => self.write_socket(b"\n").await?,
                    }
                }
            }
        };

        if announce {
            let run_id = self.state.replication.run_id().await;
            let header = format!("+FULLRESYNC {run_id} {snapshot_offset}\r\n");
            self.write_socket(header.as_bytes()).await?;
            info!(
                "Sent FULLRESYNC to replica {} with offset {}.",
                self.addr, snapshot_offset
            );
        }
        self.set_sync_state(ReplicaSyncState::WaitSnapshotEnd);

        // WAIT_SNAPSHOT_END: a newline every ping period keeps the replica's
        // liveness timer happy while the snapshot is serialized.
        let payload = loop {
            let phase = done_rx.borrow_and_update().clone();
            if let SnapshotPhase::Done(result) = phase {
                break result.map_err(|reason| {
                    CitrineError::ReplicationError(format!("snapshot production failed: {reason}"))
                })?;
            }
            tokio::select! {
                changed = done_rx.changed() => {
                    changed.map_err(|_| {
                        CitrineError::ReplicationError("snapshot producer vanished".into())
                    })?;
                }
                _ = keepalive.tick() => self.write_socket(b"\n").await?,
            }
        };

        // SEND_SNAPSHOT: length preamble, then the raw image. A zero-length
        // snapshot is legal and sends only the preamble.
        self.set_sync_state(ReplicaSyncState::SendSnapshot);
        let preamble = format!("${}\r\n", payload.len());
        self.write_socket(preamble.as_bytes()).await?;
        self.write_socket(&payload).await?;
        info!(
            "Finished sending snapshot ({} bytes) to replica {}.",
            payload.len(),
            self.addr
        );

        if let Some(stream) = self.stream.as_ref() {
            // Latency/throughput trade-off is configurable once the bulk
            // transfer is over.
            let _ = stream.set_nodelay(!disable_nodelay);
        }

        self.mark_online(snapshot_offset);
        // The snapshot covers the stream through `snapshot_offset` bytes; the
        // live feed starts at the next byte number.
        self.stream_live_updates(snapshot_offset + 1).await
    }

    /// Serves the live stream from the backlog while consuming acks from the
    /// replica on the same socket.
    async fn stream_live_updates(&mut self, mut last_offset: u64) -> Result<(), CitrineError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| CitrineError::Internal("replica stream already consumed".into()))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut acks = FramedRead::new(read_half, RespFrameCodec);
        let mut offset_rx = self.state.replication_backlog.subscribe();

        info!(
            "Replica {} is now online, streaming from offset {}.",
            self.addr, last_offset
        );

        loop {
            let newest = *offset_rx.borrow_and_update();
            if newest > last_offset {
                last_offset = self.flush_backlog(&mut write_half, last_offset).await?;
                continue;
            }

            tokio::select! {
                changed = offset_rx.changed() => {
                    if changed.is_err() {
                        // Backlog dropped; the server is reconfiguring.
                        return Ok(());
                    }
                }
                maybe_frame = acks.next() => {
                    match maybe_frame {
                        Some(Ok(frame)) => self.handle_replica_frame(frame)?,
                        Some(Err(e)) => return Err(e),
                        None => {
                            info!("Replica {} closed the connection.", self.addr);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn flush_backlog(
        &self,
        write_half: &mut OwnedWriteHalf,
        from_offset: u64,
    ) -> Result<u64, CitrineError> {
        match self.state.replication_backlog.serve(from_offset).await {
            Ok((first, second)) => {
                let mut sent = first.len() as u64;
                write_half.write_all(&first).await?;
                if let Some(second) = second {
                    sent += second.len() as u64;
                    write_half.write_all(&second).await?;
                }
                Ok(from_offset + sent)
            }
            Err(e) => {
                warn!(
                    "Lost position in backlog for replica {} ({}). Closing connection to force a full resync.",
                    self.addr, e
                );
                Err(CitrineError::ReplicationError(e.to_string()))
            }
        }
    }

    /// Frames arriving from an online replica are expected to be
    /// `REPLCONF ACK <offset>`; anything else is noted and ignored.
    fn handle_replica_frame(&self, frame: RespFrame) -> Result<(), CitrineError> {
        let command = Command::try_from(frame)?;
        if let Command::Replconf(replconf) = &command
            && let Some(offset) = replconf.ack_offset()
        {
            if let Some(mut entry) = self.state.replica_states.get_mut(&self.addr) {
                let info = entry.value_mut();
                // Acks never move backwards.
                if offset > info.ack_offset {
                    info.ack_offset = offset;
                }
                info.last_ack_time = Instant::now();
            }
            return Ok(());
        }
        debug!(
            "Ignoring unexpected '{}' from online replica {}.",
            command.name(),
            self.addr
        );
        Ok(())
    }

    fn mark_online(&self, ack_offset: u64) {
        if let Some(mut entry) = self.state.replica_states.get_mut(&self.addr) {
            let info = entry.value_mut();
            info.sync_state = ReplicaSyncState::Online;
            info.ack_offset = ack_offset;
            info.last_ack_time = Instant::now();
        }
    }

    fn set_sync_state(&self, sync_state: ReplicaSyncState) {
        if let Some(mut entry) = self.state.replica_states.get_mut(&self.addr) {
            entry.value_mut().sync_state = sync_state;
        }
    }

    async fn write_socket(&mut self, data: &[u8]) -> Result<(), CitrineError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CitrineError::Internal("replica stream already consumed".into()))?;
        stream.write_all(data).await?;
        Ok(())
    }
}
