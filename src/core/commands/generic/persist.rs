// src/core/commands/generic/persist.rs

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
pub struct Persist {
    pub key: Bytes,
}

impl ParseCommand for Persist {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "PERSIST")?;
        Ok(Persist {
            key: extract_bytes(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Persist {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let had_expiry = ctx
            .db
            .get(&self.key)
            .is_some_and(|stored| stored.expires_at_ms.is_some());
        let cleared = had_expiry && ctx.db.set_expiry(&self.key, None);
        let outcome = if cleared {
            WriteOutcome::Write { keys_modified: 1 }
        } else {
            WriteOutcome::DidNotWrite
        };
        Ok((RespValue::Integer(cleared as i64), outcome))
    }
}

impl CommandSpec for Persist {
    fn name(&self) -> &'static str {
        "persist"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone()]
    }
}
