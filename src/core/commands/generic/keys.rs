// src/core/commands/generic/keys.rs

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
pub struct Keys {
    pub pattern: String,
}

impl ParseCommand for Keys {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "KEYS")?;
        Ok(Keys {
            pattern: extract_string(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Keys {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let keys = ctx
            .db
            .keys_matching(&self.pattern)
            .into_iter()
            .map(RespValue::BulkString)
            .collect();
        Ok((RespValue::Array(keys), WriteOutcome::DidNotWrite))
    }
}

impl CommandSpec for Keys {
    fn name(&self) -> &'static str {
        "keys"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.pattern.clone().into()]
    }
}
