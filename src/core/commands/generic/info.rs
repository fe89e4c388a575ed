// src/core/commands/generic/info.rs

use crate::config::ReplicationConfig;
use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::extract_string;
use crate::core::protocol::RespFrame;
use crate::core::state::{PrimaryLinkState, ReplicaSyncState};
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Default)]
pub struct Info {
    pub section: Option<String>,
}

impl ParseCommand for Info {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        match args.len() {
            0 => Ok(Info { section: None }),
            1 => Ok(Info {
                section: Some(extract_string(&args[0])?.to_ascii_lowercase()),
            }),
            _ => Err(CitrineError::WrongArgumentCount("INFO".to_string())),
        }
    }
}

impl Info {
    fn wants(&self, section: &str) -> bool {
        self.section
            .as_deref()
            .is_none_or(|wanted| wanted == section || wanted == "all")
    }
}

#[async_trait]
impl ExecutableCommand for Info {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let state = &ctx.state;
        let mut out = String::new();

        if self.wants("server") {
            let port = state.config.lock().await.port;
            let _ = writeln!(out, "# Server");
            let _ = writeln!(out, "citrinedb_version:{}", env!("CARGO_PKG_VERSION"));
            let _ = writeln!(out, "run_id:{}", state.replication.run_id().await);
            let _ = writeln!(out, "tcp_port:{port}");
            let _ = writeln!(
                out,
                "uptime_in_seconds:{}",
                state.start_time.elapsed().as_secs()
            );
            let _ = writeln!(out);
        }

        if self.wants("clients") {
            let _ = writeln!(out, "# Clients");
            let _ = writeln!(out, "connected_clients:{}", state.clients.len());
            let _ = writeln!(out);
        }

        if self.wants("replication") {
            let config = state.config.lock().await;
            let _ = writeln!(out, "# Replication");
            match &config.replication {
                ReplicationConfig::Primary(_) => {
                    let _ = writeln!(out, "role:master");
                }
                ReplicationConfig::Replica {
                    primary_host,
                    primary_port,
                    ..
                } => {
                    let link = state.replication.get_link_state().await;
                    let processed = state
                        .replication
                        .primary_info
                        .lock()
                        .await
                        .as_ref()
                        .map_or(0, |info| info.processed_offset);
                    let _ = writeln!(out, "role:slave");
                    let _ = writeln!(out, "master_host:{primary_host}");
                    let _ = writeln!(out, "master_port:{primary_port}");
                    let _ = writeln!(
                        out,
                        "master_link_status:{}",
                        if link == PrimaryLinkState::Connected {
                            "up"
                        } else {
                            "down"
                        }
                    );
                    let _ = writeln!(
                        out,
                        "master_sync_in_progress:{}",
                        (link == PrimaryLinkState::Transfer) as u8
                    );
                    let _ = writeln!(out, "slave_repl_offset:{processed}");
                }
            }
            drop(config);

            let _ = writeln!(out, "connected_slaves:{}", state.replica_states.len());
            for (i, entry) in state.replica_states.iter().enumerate() {
                let info = entry.value();
                let state_str = match info.sync_state {
                    ReplicaSyncState::Online => "online",
                    _ => "sync",
                };
                let _ = writeln!(
                    out,
                    "slave{}:ip={},port={},state={},offset={}",
                    i,
                    entry.key().ip(),
                    info.listening_port.unwrap_or_else(|| entry.key().port()),
                    state_str,
                    info.ack_offset
                );
            }
            let _ = writeln!(
                out,
                "master_replid:{}",
                state.replication.run_id().await
            );
            let _ = writeln!(
                out,
                "master_repl_offset:{}",
                state.replication.get_replication_offset()
            );
            match state.replication_backlog.span().await {
                Some((oldest, newest)) => {
                    let _ = writeln!(out, "repl_backlog_active:1");
                    let _ = writeln!(out, "repl_backlog_first_byte_offset:{oldest}");
                    let _ = writeln!(out, "repl_backlog_histlen:{}", newest - oldest);
                }
                None => {
                    let _ = writeln!(out, "repl_backlog_active:0");
                }
            }
            let _ = writeln!(out);
        }

        if self.wants("persistence") {
            let config = state.config.lock().await;
            let _ = writeln!(out, "# Persistence");
            let _ = writeln!(
                out,
                "rdb_changes_since_last_save:{}",
                state
                    .persistence
                    .dirty_keys_counter
                    .load(Ordering::Relaxed)
            );
            let _ = writeln!(
                out,
                "aof_enabled:{}",
                config.persistence.aof_enabled as u8
            );
            let _ = writeln!(out);
        }

        if self.wants("stats") {
            let _ = writeln!(out, "# Stats");
            let _ = writeln!(
                out,
                "total_connections_received:{}",
                state.stats.get_total_connections()
            );
            let _ = writeln!(
                out,
                "total_commands_processed:{}",
                state.stats.get_total_commands()
            );
            let _ = writeln!(out);
        }

        if self.wants("keyspace") {
            let _ = writeln!(out, "# Keyspace");
            for (i, db) in state.dbs.iter().enumerate() {
                let keys = db.key_count();
                if keys > 0 {
                    let _ = writeln!(out, "db{i}:keys={keys}");
                }
            }
        }

        Ok((
            RespValue::BulkString(Bytes::from(out)),
            WriteOutcome::DidNotWrite,
        ))
    }
}

impl CommandSpec for Info {
    fn name(&self) -> &'static str {
        "info"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.section
            .as_ref()
            .map(|s| Bytes::from(s.clone()))
            .into_iter()
            .collect()
    }
}
