// src/core/persistence/aof.rs

//! The append-only file: a durable log of the propagated command stream.
//!
//! The writer consumes the same event-bus stream as replication, with its own
//! `SELECT` framing, so the file replays byte-for-byte into the state the
//! primary held. After a full resynchronization replaces a replica's dataset,
//! the log is rebuilt from the live dataset rather than appended to, since
//! its old prefix no longer leads to the current state.

use crate::config::{AppendFsync, PersistenceConfig};
use crate::core::commands::generic::{PExpireAt, Select};
use crate::core::commands::string::Set;
use crate::core::commands::ExecutionContext;
use crate::core::events::PropagatedWork;
use crate::core::protocol::resp_frame::parse_frame;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::state::ServerState;
use crate::core::{CitrineError, Command};
use bytes::BytesMut;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Encoder;
use tracing::{error, info, warn};

/// Writes propagated commands to the append-only file.
pub struct AofWriterTask {
    state: Arc<ServerState>,
    writer: BufWriter<File>,
    event_rx: mpsc::Receiver<PropagatedWork>,
    rewrite_rx: mpsc::Receiver<()>,
    path: String,
    fsync_policy: AppendFsync,
    selected_db: i64,
}

impl AofWriterTask {
    pub async fn new(
        state: Arc<ServerState>,
        event_rx: mpsc::Receiver<PropagatedWork>,
        rewrite_rx: mpsc::Receiver<()>,
    ) -> Result<Self, CitrineError> {
        let (path, fsync_policy) = {
            let config = state.config.lock().await;
            (
                config.persistence.aof_path.clone(),
                config.persistence.appendfsync,
            )
        };

        if let Some(parent) = Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            state,
            writer: BufWriter::new(file),
            event_rx,
            rewrite_rx,
            path,
            fsync_policy,
            selected_db: -1,
        })
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("AOF writer task is running (path: {}).", self.path);
        let mut fsync_interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                maybe_work = self.event_rx.recv() => {
                    match maybe_work {
                        Some(work) => {
                            if let Err(e) = self.append_work(&work).await {
                                error!("Failed to append to AOF: {}. Durable logging is degraded.", e);
                            }
                        }
                        None => {
                            info!("AOF event channel closed. Writer shutting down.");
                            break;
                        }
                    }
                }
                Some(()) = self.rewrite_rx.recv() => {
                    if let Err(e) = self.rewrite_from_dataset().await {
                        error!("AOF rewrite failed: {}. The old log was kept.", e);
                    }
                }
                _ = fsync_interval.tick(), if self.fsync_policy == AppendFsync::EverySec => {
                    if let Err(e) = self.flush_and_sync().await {
                        warn!("Periodic AOF fsync failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("AOF writer shutting down.");
                    break;
                }
            }
        }

        if let Err(e) = self.flush_and_sync().await {
            error!("Final AOF flush failed: {}", e);
        }
    }

    async fn append_work(&mut self, work: &PropagatedWork) -> Result<(), CitrineError> {
        let bytes = crate::core::replication::propagator::encode_stream_work(
            &mut self.selected_db,
            work.db_index,
            &work.command,
        )?;
        self.writer.write_all(&bytes).await?;
        if self.fsync_policy == AppendFsync::Always {
            self.flush_and_sync().await?;
        }
        Ok(())
    }

    async fn flush_and_sync(&mut self) -> Result<(), CitrineError> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_data().await?;
        Ok(())
    }

    /// Replaces the log with a minimal command sequence reconstructing the
    /// current dataset, via a temp file and an atomic rename.
    async fn rewrite_from_dataset(&mut self) -> Result<(), CitrineError> {
        info!("Rebuilding AOF from the live dataset.");
        let temp_path = format!("{}.rewrite-{}", self.path, std::process::id());
        let temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        let mut temp_writer = BufWriter::new(temp_file);
        let mut codec = RespFrameCodec;

        let result: Result<(), CitrineError> = async {
            for (db_index, db) in self.state.dbs.iter().enumerate() {
                let entries = db.all_entries();
                if entries.is_empty() {
                    continue;
                }
                let mut buf = BytesMut::new();
                let select: RespFrame = Command::Select(Select { db_index }).into();
                codec.encode(select, &mut buf)?;
                for (key, value) in entries {
                    let set: RespFrame = Command::Set(Set {
                        key: key.clone(),
                        value: value.data.clone(),
                        ..Set::default()
                    })
                    .into();
                    codec.encode(set, &mut buf)?;
                    if let Some(at_ms) = value.expires_at_ms {
                        let expire: RespFrame =
                            Command::PExpireAt(PExpireAt { key, at_ms }).into();
                        codec.encode(expire, &mut buf)?;
                    }
                }
                temp_writer.write_all(&buf).await?;
            }
            temp_writer.flush().await?;
            temp_writer.get_ref().sync_data().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        fs::rename(&temp_path, &self.path).await?;
        let file = OpenOptions::new().append(true).open(&self.path).await?;
        self.writer = BufWriter::new(file);
        self.selected_db = -1;
        info!("AOF rebuild complete.");
        Ok(())
    }
}

/// Replays the append-only file at startup.
pub struct AofLoader {
    config: PersistenceConfig,
}

impl AofLoader {
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    pub async fn load_into(&self, state: &Arc<ServerState>) -> Result<(), CitrineError> {
        let path = &self.config.aof_path;
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("AOF file not found at {}. Starting with an empty database.", path);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        info!("Replaying AOF file ({} bytes)...", data.len());
        let mut cursor = 0usize;
        let mut db_index = 0usize;
        let mut applied = 0u64;

        while cursor < data.len() {
            let (frame, consumed) = match parse_frame(&data[cursor..]) {
                Ok(parsed) => parsed,
                Err(CitrineError::IncompleteData) => {
                    // A crash mid-append can leave a truncated tail; everything
                    // before it is still valid.
                    warn!(
                        "AOF ends with a truncated command at byte {}. Loaded the valid prefix.",
                        cursor
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            cursor += consumed;

            let command = Command::try_from(frame)?;
            if let Command::Select(select) = &command {
                db_index = select.db_index;
                continue;
            }

            let db = state.get_db(db_index).ok_or_else(|| {
                CitrineError::PersistenceError("AOF selects an invalid database".into())
            })?;
            let mut ctx = ExecutionContext {
                state: state.clone(),
                db: &db,
                db_index,
                session_id: 0,
            };
            command.execute(&mut ctx).await?;
            applied += 1;
        }

        info!("AOF replay complete: {} commands applied.", applied);
        Ok(())
    }
}
