// src/core/commands/generic/auth.rs

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
pub struct Auth {
    pub password: String,
}

impl ParseCommand for Auth {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 1, "AUTH")?;
        Ok(Auth {
            password: extract_string(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Auth {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "AUTH is handled by the connection layer".into(),
        ))
    }
}

impl CommandSpec for Auth {
    fn name(&self) -> &'static str {
        "auth"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![self.password.clone().into()]
    }
}
