// src/core/commands/generic/flushall.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct FlushAll;

impl ParseCommand for FlushAll {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("FLUSHALL".to_string()));
        }
        Ok(FlushAll)
    }
}

#[async_trait]
impl ExecutableCommand for FlushAll {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        ctx.state.flush_all_dbs();
        Ok((RespValue::SimpleString("OK".into()), WriteOutcome::Flush))
    }
}

impl CommandSpec for FlushAll {
    fn name(&self) -> &'static str {
        "flushall"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
