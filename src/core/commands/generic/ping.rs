// src/core/commands/generic/ping.rs

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
pub struct Ping {
    pub msg: Option<Bytes>,
}

impl ParseCommand for Ping {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        match args.len() {
            0 => Ok(Ping { msg: None }),
            1 => Ok(Ping {
                msg: Some(extract_bytes(&args[0])?),
            }),
            _ => Err(CitrineError::WrongArgumentCount("PING".to_string())),
        }
    }
}

#[async_trait]
impl ExecutableCommand for Ping {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let reply = match &self.msg {
            Some(msg) => RespValue::BulkString(msg.clone()),
            None => RespValue::SimpleString("PONG".into()),
        };
        Ok((reply, WriteOutcome::DidNotWrite))
    }
}

impl CommandSpec for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.msg.clone().into_iter().collect()
    }
}
