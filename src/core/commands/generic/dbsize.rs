// src/core/commands/generic/dbsize.rs

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
pub struct DbSize;

impl ParseCommand for DbSize {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("DBSIZE".to_string()));
        }
        Ok(DbSize)
    }
}

#[async_trait]
impl ExecutableCommand for DbSize {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Ok((
            RespValue::Integer(ctx.db.key_count() as i64),
            WriteOutcome::DidNotWrite,
        ))
    }
}

impl CommandSpec for DbSize {
    fn name(&self) -> &'static str {
        "dbsize"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
