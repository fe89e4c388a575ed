// src/core/commands/generic/wait.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::generic::Replconf;
use crate::core::commands::helpers::{extract_u64, validate_arg_count};
use crate::core::events::PropagatedWork;
use crate::core::protocol::RespFrame;
use crate::core::state::{ReplicaSyncState, ServerState};
use crate::core::{CitrineError, Command, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How often the ack counts are re-checked while waiting.
const WAIT_POLL_PERIOD: Duration = Duration::from_millis(50);

/// `WAIT numreplicas timeout_ms` blocks until at least `numreplicas` replicas
/// have acknowledged everything written so far, or the timeout elapses. It is
/// advisory: the primary never makes writes conditional on the result.
#[derive(Debug, Clone, Default)]
pub struct Wait {
    pub num_replicas: usize,
    pub timeout_ms: u64,
}

impl ParseCommand for Wait {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "WAIT")?;
        Ok(Wait {
            num_replicas: extract_u64(&args[0])? as usize,
            timeout_ms: extract_u64(&args[1])?,
        })
    }
}

fn count_acked(state: &Arc<ServerState>, target_offset: u64) -> usize {
    state
        .replica_states
        .iter()
        .filter(|entry| {
            entry.value().sync_state == ReplicaSyncState::Online
                && entry.value().ack_offset >= target_offset
        })
        .count()
}

#[async_trait]
impl ExecutableCommand for Wait {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let target_offset = ctx.state.replication.get_replication_offset();

        let acked = count_acked(&ctx.state, target_offset);
        if acked >= self.num_replicas {
            return Ok((RespValue::Integer(acked as i64), WriteOutcome::DidNotWrite));
        }

        // Ask every replica for an immediate ack; the request travels through
        // the ordinary stream so its own bytes are covered by later acks.
        ctx.state.event_bus.publish(PropagatedWork {
            db_index: ctx.db_index,
            command: Command::Replconf(Replconf {
                args: vec!["GETACK".to_string(), "*".to_string()],
            }),
        });

        let deadline = if self.timeout_ms == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(self.timeout_ms))
        };

        loop {
            let acked = count_acked(&ctx.state, target_offset);
            if acked >= self.num_replicas {
                return Ok((RespValue::Integer(acked as i64), WriteOutcome::DidNotWrite));
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Ok((RespValue::Integer(acked as i64), WriteOutcome::DidNotWrite));
            }
            tokio::time::sleep(WAIT_POLL_PERIOD).await;
        }
    }
}

impl CommandSpec for Wait {
    fn name(&self) -> &'static str {
        "wait"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![
            self.num_replicas.to_string().into(),
            self.timeout_ms.to_string().into(),
        ]
    }
}
