// src/core/commands/generic/role.rs

use crate::config::ReplicationConfig;
use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::protocol::RespFrame;
use crate::core::state::ReplicaSyncState;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Role;

impl ParseCommand for Role {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("ROLE".to_string()));
        }
        Ok(Role)
    }
}

#[async_trait]
impl ExecutableCommand for Role {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let state = &ctx.state;
        let config = state.config.lock().await;

        let reply = match &config.replication {
            ReplicationConfig::Primary(_) => {
                let replicas = state
                    .replica_states
                    .iter()
                    .filter(|entry| entry.value().sync_state == ReplicaSyncState::Online)
                    .map(|entry| {
                        RespValue::Array(vec![
                            RespValue::BulkString(entry.key().ip().to_string().into()),
                            RespValue::BulkString(
                                entry
                                    .value()
                                    .listening_port
                                    .unwrap_or_else(|| entry.key().port())
                                    .to_string()
                                    .into(),
                            ),
                            RespValue::BulkString(entry.value().ack_offset.to_string().into()),
                        ])
                    })
                    .collect();
                RespValue::Array(vec![
                    RespValue::BulkString(Bytes::from_static(b"master")),
                    RespValue::Integer(state.replication.get_replication_offset() as i64),
                    RespValue::Array(replicas),
                ])
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
                RespValue::Array(vec![
                    RespValue::BulkString(Bytes::from_static(b"slave")),
                    RespValue::BulkString(primary_host.clone().into()),
                    RespValue::Integer(*primary_port as i64),
                    RespValue::BulkString(link.as_str().to_string().into()),
                    RespValue::Integer(processed as i64),
                ])
            }
        };

        Ok((reply, WriteOutcome::DidNotWrite))
    }
}

impl CommandSpec for Role {
    fn name(&self) -> &'static str {
        "role"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
