// src/core/commands/generic/echo.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, validate_arg_count};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Echo {
    pub msg: Bytes,
}

impl ParseCommand for Echo {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "ECHO")?;
        Ok(Echo {
            msg: extract_bytes(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Echo {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Ok((
            RespValue::BulkString(self.msg.clone()),
            WriteOutcome::DidNotWrite,
        ))
    }
}

impl CommandSpec for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.msg.clone()]
    }
}
