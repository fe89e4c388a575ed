// src/core/commands/generic/psync.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_string, validate_arg_count};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Psync {
    pub replication_id: String,
    pub offset: String,
}

impl ParseCommand for Psync {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "PSYNC")?;
        Ok(Psync {
            replication_id: extract_string(&args[0])?,
            offset: extract_string(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Psync {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "PSYNC command should not be executed directly".into(),
        ))
    }
}

impl CommandSpec for Psync {
    fn name(&self) -> &'static str {
        "psync"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::ADMIN | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![
            self.replication_id.clone().into(),
            self.offset.clone().into(),
        ]
    }
}
