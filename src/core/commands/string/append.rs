// src/core/commands/string/append.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, validate_arg_count};
use crate::core::protocol::RespFrame;
use crate::core::storage::StoredValue;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Default)]
pub struct Append {
    pub key: Bytes,
    pub value: Bytes,
}

impl ParseCommand for Append {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "APPEND")?;
        Ok(Append {
            key: extract_bytes(&args[0])?,
            value: extract_bytes(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Append {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        // Appending modifies the value in place, so an existing TTL survives.
        let (data, expires_at_ms) = match ctx.db.get(&self.key) {
            Some(existing) => {
                let mut combined = BytesMut::with_capacity(existing.data.len() + self.value.len());
                combined.extend_from_slice(&existing.data);
                combined.extend_from_slice(&self.value);
                (combined.freeze(), existing.expires_at_ms)
            }
            None => (self.value.clone(), None),
        };
        let new_len = data.len();
        ctx.db.set(
            self.key.clone(),
            StoredValue {
                data,
                expires_at_ms,
            },
        );
        Ok((
            RespValue::Integer(new_len as i64),
            WriteOutcome::Write { keys_modified: 1 },
        ))
    }
}

impl CommandSpec for Append {
    fn name(&self) -> &'static str {
        "append"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone(), self.value.clone()]
    }
}
