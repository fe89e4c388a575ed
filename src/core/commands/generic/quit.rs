// src/core/commands/generic/quit.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Quit;

impl ParseCommand for Quit {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("QUIT".to_string()));
        }
        Ok(Quit)
    }
}

#[async_trait]
impl ExecutableCommand for Quit {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "QUIT is handled by the connection layer".into(),
        ))
    }
}

impl CommandSpec for Quit {
    fn name(&self) -> &'static str {
        "quit"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
