// src/core/replication/worker.rs

//! Implements the replication logic for a replica server.
//!
//! This worker owns the entire lifecycle of a replica's link to its primary.
//! It connects, performs the bounded-deadline handshake (PING, optional AUTH,
//! REPLCONF, PSYNC), handles full (snapshot transfer) and partial (backlog
//! replay) resynchronization, and then consumes the continuous stream of
//! write commands, acknowledging its processed offset once per second.
//!
//! It is designed to be resilient: connection failures back off
//! exponentially with jitter, a lost primary is kept as a cached session so
//! the next handshake can resume incrementally, and the worker reconfigures
//! itself when the server's role changes at runtime.

use crate::config::ReplicationConfig;
use crate::core::commands::command_trait::{CommandFlags, WriteOutcome};
use crate::core::events::PropagatedWork;
use crate::core::persistence::ctdb;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::replication::roles;
use crate::core::state::{PrimaryInfo, PrimaryLinkState, ServerState};
use crate::core::{CitrineError, Command, commands};
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

// The initial delay before the first reconnection attempt.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
// The maximum delay for the exponential backoff reconnection strategy.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
// How often the replica volunteers a REPLCONF ACK while streaming.
const ACK_PERIOD: Duration = Duration::from_secs(1);
// Force a range-sync of the incoming snapshot file this often, to bound the
// final flush latency.
const TRANSFER_SYNC_EVERY: u64 = 8 * 1024 * 1024;
// Read granularity during the snapshot transfer.
const TRANSFER_READ_BUF: usize = 16 * 1024;

/// Unlinks the in-flight snapshot temp file unless the transfer completed.
/// The worker can be cancelled at any await point by a role change, so the
/// cleanup must not rely on reaching an error branch.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// The result of a successful handshake with the primary.
#[derive(Debug)]
enum HandshakeResult {
    /// The primary will send a full snapshot, to be applied under the given
    /// stream identity and offset.
    FullResync { run_id: String, offset: u64 },
    /// The primary resumes the stream where the cached session left off.
    PartialResync,
}

/// Everything a single connection cycle needs from the configuration.
#[derive(Debug, Clone)]
struct CycleConfig {
    host: String,
    port: u16,
    auth: Option<String>,
    my_port: u16,
    syncio_timeout: Duration,
    repl_timeout: Duration,
    ctdb_path: String,
    aof_enabled: bool,
}

/// The main worker task for a replica server.
pub struct ReplicaWorker {
    state: Arc<ServerState>,
    /// The logical database selected by the primary's stream. Survives
    /// reconnects: a partial resync resumes mid-stream and must keep the
    /// database context of the last applied SELECT.
    current_db_index: usize,
    /// False once the primary rejected PSYNC and the legacy SYNC path was
    /// taken; such primaries do not understand REPLCONF ACK either.
    primary_supports_psync: bool,
}

impl ReplicaWorker {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            current_db_index: 0,
            primary_supports_psync: true,
        }
    }

    /// The main run loop: manages connection cycles and reconnection with
    /// exponential backoff. Returns when the server is no longer a replica.
    pub async fn run(mut self, mut reconfigure_rx: broadcast::Receiver<()>) {
        info!("Replica worker started.");
        let mut current_delay = INITIAL_RECONNECT_DELAY;

        loop {
            // Re-read the configuration at the top of every cycle so the
            // worker self-corrects even if a reconfigure signal was missed.
            let Some(cycle_config) = self.read_cycle_config().await else {
                info!("Server role is no longer REPLICA. Shutting down replica worker.");
                return;
            };

            tokio::select! {
                _ = reconfigure_rx.recv() => {
                    // Role or target changed; abandon any in-flight handshake
                    // and re-enter the loop against the new configuration.
                    info!("Received replication reconfigure signal. Restarting connection cycle.");
                    roles::cache_active_primary(&self.state).await;
                    self.state.replication.set_link_state(PrimaryLinkState::Connect).await;
                    current_delay = INITIAL_RECONNECT_DELAY;
                    continue;
                }
                result = self.handle_connection_cycle(&cycle_config) => {
                    roles::cache_active_primary(&self.state).await;
                    self.state.replication.set_link_state(PrimaryLinkState::Connect).await;

                    if let Err(e) = &result {
                        warn!("Replication cycle failed: {e}. Reconnecting...");
                    } else {
                        info!("Connection to primary closed cleanly. Reconnecting...");
                        current_delay = INITIAL_RECONNECT_DELAY;
                    }

                    // Jitter avoids a thundering herd against a restarting primary.
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    let wait_time = current_delay + jitter;
                    info!("Will try to reconnect to primary in {wait_time:?}");

                    tokio::select! {
                        _ = tokio::time::sleep(wait_time) => {}
                        _ = reconfigure_rx.recv() => {
                            info!("Reconfigure signal received during backoff. Reconnecting immediately.");
                            current_delay = INITIAL_RECONNECT_DELAY;
                        }
                    }

                    current_delay = (current_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }

    async fn read_cycle_config(&self) -> Option<CycleConfig> {
        let config = self.state.config.lock().await;
        match &config.replication {
            ReplicationConfig::Replica {
                primary_host,
                primary_port,
                primary_auth,
            } => Some(CycleConfig {
                host: primary_host.clone(),
                port: *primary_port,
                auth: primary_auth.clone(),
                my_port: config.port,
                syncio_timeout: config.replication_tuning.syncio_timeout,
                repl_timeout: config.replication_tuning.repl_timeout,
                ctdb_path: config.persistence.ctdb_path.clone(),
                aof_enabled: config.persistence.aof_enabled,
            }),
            _ => None,
        }
    }

    /// Manages a single connection lifecycle: connect, handshake, sync, and
    /// process the command stream.
    async fn handle_connection_cycle(&mut self, config: &CycleConfig) -> Result<(), CitrineError> {
        self.state
            .replication
            .set_link_state(PrimaryLinkState::Connecting)
            .await;

        let addr = format!("{}:{}", config.host, config.port);
        info!("Attempting to connect to primary at {}", addr);
        let stream = timeout(config.syncio_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| CitrineError::ReplicationError("connect timed out".into()))?
            .map_err(|e| CitrineError::ReplicationError(format!("Failed to connect: {e}")))?;

        info!("Successfully connected to primary. Starting handshake...");
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let handshake = self
            .perform_handshake(&mut reader, &mut writer, config)
            .await?;
        debug!("Handshake completed with result: {handshake:?}");

        match handshake {
            HandshakeResult::FullResync { run_id, offset } => {
                self.state
                    .replication
                    .set_link_state(PrimaryLinkState::Transfer)
                    .await;
                self.receive_snapshot(&mut reader, config).await?;
                self.current_db_index = 0;
                *self.state.replication.primary_info.lock().await = Some(PrimaryInfo {
                    run_id,
                    processed_offset: offset,
                });
                if config.aof_enabled
                    && let Some(tx) = &self.state.persistence.aof_rewrite_request_tx
                {
                    // The old log no longer leads to this dataset.
                    let _ = tx.send(()).await;
                }
                info!("Full resync successful. Snapshot loaded.");
            }
            HandshakeResult::PartialResync => {
                let cached = self.state.replication.cached_primary.lock().await.take();
                *self.state.replication.primary_info.lock().await = cached;
                info!("Partial resync accepted. Resuming command stream.");
            }
        }

        self.state
            .replication
            .set_link_state(PrimaryLinkState::Connected)
            .await;
        self.process_command_stream(reader, writer, config).await
    }

    // --- Handshake ---

    async fn perform_handshake(
        &mut self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        config: &CycleConfig,
    ) -> Result<HandshakeResult, CitrineError> {
        let deadline = config.syncio_timeout;

        // Step 1: PING. The primary may demand authentication first; both
        // well-known refusals still prove liveness.
        send_command(writer, deadline, &["PING"]).await?;
        let reply = read_reply_line(reader, deadline).await?;
        if !reply.starts_with('+')
            && !reply.starts_with("-NOAUTH")
            && !reply.starts_with("-ERR operation not permitted")
        {
            return Err(CitrineError::ReplicationError(format!(
                "Unexpected PING reply: {reply}"
            )));
        }
        info!("Handshake step 1/4 (PING) successful.");

        // Step 2: AUTH, when configured.
        if let Some(password) = &config.auth {
            send_command(writer, deadline, &["AUTH", password]).await?;
            let reply = read_reply_line(reader, deadline).await?;
            if !reply.starts_with('+') {
                return Err(CitrineError::ReplicationError(format!(
                    "Authentication with primary failed: {reply}"
                )));
            }
            info!("Handshake step 2/4 (AUTH) successful.");
        }

        // Step 3: advertise the service port. Very old primaries reject
        // REPLCONF; that alone is not fatal.
        let my_port = config.my_port.to_string();
        send_command(writer, deadline, &["REPLCONF", "listening-port", &my_port]).await?;
        let reply = read_reply_line(reader, deadline).await?;
        if !reply.starts_with('+') {
            warn!("Primary rejected REPLCONF listening-port ({reply}); continuing anyway.");
        }
        info!("Handshake step 3/4 (REPLCONF port) successful.");

        // Step 4: PSYNC, resuming from the cached primary when one exists.
        let cached = self.state.replication.cached_primary.lock().await.clone();
        let (psync_id, psync_offset) = match &cached {
            Some(info) => (info.run_id.clone(), (info.processed_offset + 1).to_string()),
            None => ("?".to_string(), "-1".to_string()),
        };
        info!("Handshake step 4/4: Sending PSYNC with id '{psync_id}' and offset '{psync_offset}'.");
        send_command(writer, deadline, &["PSYNC", &psync_id, &psync_offset]).await?;

        let reply = read_reply_line(reader, deadline).await?;
        if let Some(rest) = reply.strip_prefix("+FULLRESYNC") {
            let (run_id, offset) = parse_fullresync(rest)?;
            info!(
                "Primary ordered full resync. Run id: {run_id}. Offset: {offset}."
            );
            *self.state.replication.cached_primary.lock().await = None;
            return Ok(HandshakeResult::FullResync { run_id, offset });
        }
        if reply.eq_ignore_ascii_case("+CONTINUE") {
            return Ok(HandshakeResult::PartialResync);
        }
        if reply.starts_with('-') {
            // A primary that predates PSYNC. Fall back to the unconditional
            // transfer, with no stream identity to track.
            warn!("Primary does not support PSYNC ({reply}). Falling back to SYNC.");
            self.primary_supports_psync = false;
            *self.state.replication.cached_primary.lock().await = None;
            send_command(writer, deadline, &["SYNC"]).await?;
            return Ok(HandshakeResult::FullResync {
                run_id: "?".to_string(),
                offset: 0,
            });
        }
        Err(CitrineError::ReplicationError(format!(
            "Unexpected PSYNC response: {reply}"
        )))
    }

    // --- Snapshot transfer ---

    /// Consumes the `$<size>\r\n` preamble (tolerating bare newline
    /// keepalives), streams the payload into an exclusively created temp
    /// file, and atomically installs it as the canonical snapshot before
    /// loading it.
    async fn receive_snapshot(
        &mut self,
        reader: &mut BufReader<OwnedReadHalf>,
        config: &CycleConfig,
    ) -> Result<(), CitrineError> {
        let size = loop {
            let line = read_reply_line(reader, config.repl_timeout).await?;
            if line.is_empty() {
                // Newline keepalive while the primary serializes.
                continue;
            }
            let Some(len_str) = line.strip_prefix('$') else {
                return Err(CitrineError::ProtocolError(format!(
                    "Expected snapshot length prefix ('$'), got: {line}"
                )));
            };
            break len_str.parse::<u64>().map_err(|_| {
                CitrineError::ProtocolError(format!("Invalid snapshot length: {len_str}"))
            })?;
        };
        info!("Receiving snapshot of {size} bytes from primary.");

        let canonical = PathBuf::from(&config.ctdb_path);
        if let Some(parent) = canonical.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let temp_name = format!("temp-{}-{}.ctdb", unix_seconds, std::process::id());
        let temp_path = match canonical.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(temp_name),
            _ => PathBuf::from(temp_name),
        };

        let mut temp_file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        let mut guard = TempFileGuard {
            path: temp_path.clone(),
            armed: true,
        };

        let mut remaining = size;
        let mut unsynced: u64 = 0;
        let mut buf = vec![0u8; TRANSFER_READ_BUF];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = timeout(config.repl_timeout, reader.read(&mut buf[..want]))
                .await
                .map_err(|_| {
                    CitrineError::ReplicationError("snapshot transfer timed out".into())
                })??;
            if n == 0 {
                return Err(CitrineError::ReplicationError(
                    "connection closed mid-transfer".into(),
                ));
            }
            temp_file.write_all(&buf[..n]).await?;
            remaining -= n as u64;
            unsynced += n as u64;
            if unsynced >= TRANSFER_SYNC_EVERY {
                temp_file.sync_data().await?;
                unsynced = 0;
            }
        }
        temp_file.flush().await?;
        temp_file.sync_all().await?;
        drop(temp_file);

        fs::rename(&temp_path, &canonical).await?;
        guard.armed = false;

        // The transferred image replaces the dataset wholesale.
        self.state.flush_all_dbs();
        ctdb::load_from_file(&config.ctdb_path, &self.state.dbs).await?;
        info!("Finished loading snapshot data from primary.");
        Ok(())
    }

    // --- Live stream ---

    async fn process_command_stream(
        &mut self,
        reader: BufReader<OwnedReadHalf>,
        mut writer: OwnedWriteHalf,
        config: &CycleConfig,
    ) -> Result<(), CitrineError> {
        info!("Now in sync mode, processing command stream from primary.");
        let mut framed = FramedRead::new(reader, RespFrameCodec);
        let mut ack_interval = tokio::time::interval(ACK_PERIOD);

        loop {
            tokio::select! {
                result = timeout(config.repl_timeout, framed.next()) => {
                    match result {
                        Err(_) => {
                            return Err(CitrineError::ReplicationError(
                                "primary timed out (no traffic within repl_timeout)".into(),
                            ));
                        }
                        Ok(None) => return Ok(()),
                        Ok(Some(Err(e))) => return Err(e),
                        Ok(Some(Ok(frame))) => {
                            self.handle_primary_frame(frame, &mut writer).await?;
                        }
                    }
                }
                _ = ack_interval.tick() => {
                    if self.primary_supports_psync {
                        self.send_ack(&mut writer).await?;
                    }
                }
            }
        }
    }

    async fn handle_primary_frame(
        &mut self,
        frame: RespFrame,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), CitrineError> {
        let frame_len = frame.encoded_len() as u64;
        let command = Command::try_from(frame)?;
        debug!("Received command from primary: {}", command.name());

        match &command {
            Command::Ping(_) => {}
            Command::Select(select) => {
                self.current_db_index = select.db_index;
            }
            Command::Replconf(replconf) if replconf.is_getack() => {
                // The ack must cover the GETACK frame itself.
                self.advance_processed_offset(frame_len).await;
                self.send_ack(writer).await?;
                return Ok(());
            }
            _ => {
                let flags = command.get_flags();
                if flags.contains(CommandFlags::WRITE) || flags.contains(CommandFlags::SCRIPTING) {
                    self.apply_replicated_command(&command).await?;
                }
            }
        }

        // The offset only covers bytes whose effects are fully applied.
        self.advance_processed_offset(frame_len).await;
        Ok(())
    }

    async fn apply_replicated_command(&mut self, command: &Command) -> Result<(), CitrineError> {
        // Held across execute-then-publish so a snapshot cut for chained
        // replicas never falls between the two.
        let _propagating = self.state.write_pause.read().await;

        let outcome =
            match commands::apply_write_command(&self.state, self.current_db_index, command).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The dataset may now diverge from the primary in an
                    // unknown way; keeping it would serve wrong data.
                    error!(
                        "CRITICAL: Failed to execute propagated command '{}': {e}. Clearing local data.",
                        command.name()
                    );
                    self.state.flush_all_dbs();
                    self.current_db_index = 0;
                    *self.state.replication.primary_info.lock().await = None;
                    *self.state.replication.cached_primary.lock().await = None;
                    return Err(e);
                }
            };

        // Re-publish for chained replicas and the local AOF. The stream a
        // cascading node produces runs under its own run id and offsets.
        if outcome != WriteOutcome::DidNotWrite {
            self.state.event_bus.publish(PropagatedWork {
                db_index: self.current_db_index,
                command: command.clone(),
            });
        }
        Ok(())
    }

    async fn advance_processed_offset(&self, delta: u64) {
        if let Some(info) = self.state.replication.primary_info.lock().await.as_mut() {
            info.processed_offset += delta;
        }
    }

    async fn send_ack(&self, writer: &mut OwnedWriteHalf) -> Result<(), CitrineError> {
        let offset = self
            .state
            .replication
            .primary_info
            .lock()
            .await
            .as_ref()
            .map_or(0, |info| info.processed_offset);
        let frame = command_frame(&["REPLCONF", "ACK", &offset.to_string()]);
        writer.write_all(&frame.encode_to_vec()?).await?;
        debug!("Sent ACK to primary with offset {offset}.");
        Ok(())
    }
}

// --- Wire helpers ---

fn command_frame(parts: &[&str]) -> RespFrame {
    RespFrame::Array(
        parts
            .iter()
            .map(|part| RespFrame::BulkString(Bytes::copy_from_slice(part.as_bytes())))
            .collect(),
    )
}

async fn send_command(
    writer: &mut OwnedWriteHalf,
    deadline: Duration,
    parts: &[&str],
) -> Result<(), CitrineError> {
    let encoded = command_frame(parts).encode_to_vec()?;
    timeout(deadline, writer.write_all(&encoded))
        .await
        .map_err(|_| CitrineError::ReplicationError("handshake write timed out".into()))??;
    Ok(())
}

/// Reads one `\r\n`-terminated reply line within the deadline. Returns the
/// line without its terminator; a bare keepalive newline becomes the empty
/// string.
async fn read_reply_line(
    reader: &mut BufReader<OwnedReadHalf>,
    deadline: Duration,
) -> Result<String, CitrineError> {
    let mut line = String::new();
    let n = timeout(deadline, reader.read_line(&mut line))
        .await
        .map_err(|_| CitrineError::ReplicationError("handshake read timed out".into()))??;
    if n == 0 {
        return Err(CitrineError::ReplicationError(
            "connection closed by primary".into(),
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_fullresync(rest: &str) -> Result<(String, u64), CitrineError> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(CitrineError::ProtocolError(
            "Invalid FULLRESYNC format".into(),
        ));
    }
    let run_id = parts[0].to_string();
    let offset = parts[1]
        .parse::<u64>()
        .map_err(|_| CitrineError::ProtocolError("Invalid offset in FULLRESYNC".into()))?;
    Ok((run_id, offset))
}
