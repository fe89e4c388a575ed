// src/core/commands/string/incr.rs

//! The INCR/DECR/INCRBY/DECRBY family, all sharing one arithmetic core.

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, extract_i64, validate_arg_count};
use crate::core::protocol::RespFrame;
use crate::core::storage::StoredValue;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

/// Applies a signed delta to the integer stored at `key`, preserving any TTL.
async fn apply_delta(
    ctx: &mut ExecutionContext<'_>,
    key: &Bytes,
    delta: i64,
) -> Result<(RespValue, WriteOutcome), CitrineError> {
    let (current, expires_at_ms) = match ctx.db.get(key) {
        Some(stored) => {
            let text = std::str::from_utf8(&stored.data)?;
            let value = text.parse::<i64>().map_err(|_| CitrineError::NotAnInteger)?;
            (value, stored.expires_at_ms)
        }
        None => (0, None),
    };

    let new_value = current.checked_add(delta).ok_or(CitrineError::Overflow)?;
    ctx.db.set(
        key.clone(),
        StoredValue {
            data: Bytes::from(new_value.to_string()),
            expires_at_ms,
        },
    );
    Ok((
        RespValue::Integer(new_value),
        WriteOutcome::Write { keys_modified: 1 },
    ))
}

#[derive(Debug, Clone, Default)]
pub struct Incr {
    pub key: Bytes,
}

impl ParseCommand for Incr {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "INCR")?;
        Ok(Incr {
            key: extract_bytes(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Incr {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        apply_delta(ctx, &self.key, 1).await
    }
}

impl CommandSpec for Incr {
    fn name(&self) -> &'static str {
        "incr"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Decr {
    pub key: Bytes,
}

impl ParseCommand for Decr {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "DECR")?;
        Ok(Decr {
            key: extract_bytes(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Decr {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        apply_delta(ctx, &self.key, -1).await
    }
}

impl CommandSpec for Decr {
    fn name(&self) -> &'static str {
        "decr"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncrBy {
    pub key: Bytes,
    pub delta: i64,
}

impl ParseCommand for IncrBy {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "INCRBY")?;
        Ok(IncrBy {
            key: extract_bytes(&args[0])?,
            delta: extract_i64(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for IncrBy {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        apply_delta(ctx, &self.key, self.delta).await
    }
}

impl CommandSpec for IncrBy {
    fn name(&self) -> &'static str {
        "incrby"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone(), self.delta.to_string().into()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecrBy {
    pub key: Bytes,
    pub delta: i64,
}

impl ParseCommand for DecrBy {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "DECRBY")?;
        Ok(DecrBy {
            key: extract_bytes(&args[0])?,
            delta: extract_i64(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for DecrBy {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let delta = self.delta.checked_neg().ok_or(CitrineError::Overflow)?;
        apply_delta(ctx, &self.key, delta).await
    }
}

impl CommandSpec for DecrBy {
    fn name(&self) -> &'static str {
        "decrby"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.key.clone(), self.delta.to_string().into()]
    }
}
