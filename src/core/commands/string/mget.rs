// src/core/commands/string/mget.rs

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
pub struct MGet {
    pub keys: Vec<Bytes>,
}

impl ParseCommand for MGet {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("MGET".to_string()));
        }
        let keys = args.iter().map(extract_bytes).collect::<Result<_, _>>()?;
        Ok(MGet { keys })
    }
}

#[async_trait]
impl ExecutableCommand for MGet {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let values = self
            .keys
            .iter()
            .map(|key| match ctx.db.get(key) {
                Some(stored) => RespValue::BulkString(stored.data),
                None => RespValue::Null,
            })
            .collect();
        Ok((RespValue::Array(values), WriteOutcome::DidNotWrite))
    }
}

impl CommandSpec for MGet {
    fn name(&self) -> &'static str {
        "mget"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.keys.clone()
    }
}
