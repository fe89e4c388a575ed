// src/core/commands/generic/ttl.rs

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
pub struct Ttl {
    pub key: Bytes,
}

impl ParseCommand for Ttl {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "TTL")?;
        Ok(Ttl {
            key: extract_bytes(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Ttl {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let reply = match ctx.db.get(&self.key) {
            None => RespValue::Integer(-2),
            Some(stored) => match stored.ttl_ms() {
                Some(remaining) => RespValue::Integer((remaining / 1000) as i64),
                None => RespValue::Integer(-1),
            },
        };
        Ok((reply, WriteOutcome::DidNotWrite))
    }
}

impl CommandSpec for Ttl {
    fn name(&self) -> &'static str {
        "ttl"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone()]
    }
}
