// src/core/commands/generic/select.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_u64, validate_arg_count};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Select {
    pub db_index: usize,
}

impl ParseCommand for Select {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "SELECT")?;
        Ok(Select {
            db_index: extract_u64(&args[0])? as usize,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Select {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "SELECT is handled by the connection layer".into(),
        ))
    }
}

impl CommandSpec for Select {
    fn name(&self) -> &'static str {
        "select"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.db_index.to_string().into()]
    }
}
