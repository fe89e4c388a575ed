// src/core/commands/generic/expire.rs

//! EXPIRE and its absolute-deadline sibling PEXPIREAT.
//!
//! Only PEXPIREAT ever reaches replicas or the append-only file: the router
//! rewrites EXPIRE into PEXPIREAT at propagation time so every copy of the
//! dataset applies the same absolute deadline.

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, extract_u64, validate_arg_count};
use crate::core::protocol::RespFrame;
use crate::core::storage::data_types::now_ms;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Expire {
    pub key: Bytes,
    pub seconds: u64,
}

impl ParseCommand for Expire {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "EXPIRE")?;
        Ok(Expire {
            key: extract_bytes(&args[0])?,
            seconds: extract_u64(&args[1])?,
        })
    }
}

impl Expire {
    /// The absolute deadline this command resolves to at this instant.
    pub fn deadline_ms(&self) -> u64 {
        now_ms() + self.seconds * 1000
    }
}

#[async_trait]
impl ExecutableCommand for Expire {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let applied = ctx.db.set_expiry(&self.key, Some(self.deadline_ms()));
        let outcome = if applied {
            WriteOutcome::Write { keys_modified: 1 }
        } else {
            WriteOutcome::DidNotWrite
        };
        Ok((RespValue::Integer(applied as i64), outcome))
    }
}

impl CommandSpec for Expire {
    fn name(&self) -> &'static str {
        "expire"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone(), self.seconds.to_string().into()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct PExpireAt {
    pub key: Bytes,
    pub at_ms: u64,
}

impl ParseCommand for PExpireAt {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "PEXPIREAT")?;
        Ok(PExpireAt {
            key: extract_bytes(&args[0])?,
            at_ms: extract_u64(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for PExpireAt {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        // A deadline in the past deletes the key outright.
        if self.at_ms <= now_ms() {
            let removed = ctx.db.remove(&self.key);
            let outcome = if removed {
                WriteOutcome::Delete { keys_deleted: 1 }
            } else {
                WriteOutcome::DidNotWrite
            };
            return Ok((RespValue::Integer(removed as i64), outcome));
        }

        let applied = ctx.db.set_expiry(&self.key, Some(self.at_ms));
        let outcome = if applied {
            WriteOutcome::Write { keys_modified: 1 }
        } else {
            WriteOutcome::DidNotWrite
        };
        Ok((RespValue::Integer(applied as i64), outcome))
    }
}

impl CommandSpec for PExpireAt {
    fn name(&self) -> &'static str {
        "pexpireat"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone(), self.at_ms.to_string().into()]
    }
}
