// src/core/commands/generic/sync.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

/// The pre-PSYNC resynchronization command: an unconditional full transfer
/// with no stream-position bookkeeping. Kept for replicas that do not speak
/// PSYNC.
#[derive(Debug, Clone, Default)]
pub struct Sync;

impl ParseCommand for Sync {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("SYNC".to_string()));
        }
        Ok(Sync)
    }
}

#[async_trait]
impl ExecutableCommand for Sync {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "SYNC command should not be executed directly".into(),
        ))
    }
}

impl CommandSpec for Sync {
    fn name(&self) -> &'static str {
        "sync"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::ADMIN | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
