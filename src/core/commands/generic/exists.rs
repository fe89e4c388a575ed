// src/core/commands/generic/exists.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::extract_bytes;
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Exists {
    pub keys: Vec<Bytes>,
}

impl ParseCommand for Exists {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("EXISTS".to_string()));
        }
        let keys = args.iter().map(extract_bytes).collect::<Result<_, _>>()?;
        Ok(Exists { keys })
    }
}

#[async_trait]
impl ExecutableCommand for Exists {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let count = self.keys.iter().filter(|key| ctx.db.contains(key)).count();
        Ok((RespValue::Integer(count as i64), WriteOutcome::DidNotWrite))
    }
}

impl CommandSpec for Exists {
    fn name(&self) -> &'static str {
        "exists"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.keys.clone()
    }
}
