// src/core/commands/generic/del.rs

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
pub struct Del {
    pub keys: Vec<Bytes>,
}

impl ParseCommand for Del {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("DEL".to_string()));
        }
        let keys = args.iter().map(extract_bytes).collect::<Result<_, _>>()?;
        Ok(Del { keys })
    }
}

#[async_trait]
impl ExecutableCommand for Del {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let mut removed = 0u64;
        for key in &self.keys {
            if ctx.db.remove(key) {
                removed += 1;
            }
        }
        let outcome = if removed > 0 {
            WriteOutcome::Delete {
                keys_deleted: removed,
            }
        } else {
            WriteOutcome::DidNotWrite
        };
        Ok((RespValue::Integer(removed as i64), outcome))
    }
}

impl CommandSpec for Del {
    fn name(&self) -> &'static str {
        "del"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.keys.clone()
    }
}
