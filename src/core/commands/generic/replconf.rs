// src/core/commands/generic/replconf.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::extract_string;
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Replconf {
    pub args: Vec<String>,
}

impl Replconf {
    /// True for `REPLCONF GETACK *`, the primary's request for an immediate ack.
    pub fn is_getack(&self) -> bool {
        self.args
            .first()
            .is_some_and(|arg| arg.eq_ignore_ascii_case("GETACK"))
    }

    /// Extracts `(listening-port, port)` if that is what this REPLCONF carries.
    pub fn listening_port(&self) -> Option<u16> {
        if self
            .args
            .first()
            .is_some_and(|arg| arg.eq_ignore_ascii_case("listening-port"))
        {
            return self.args.get(1).and_then(|port| port.parse().ok());
        }
        None
    }

    /// Extracts the offset of a `REPLCONF ACK <offset>`.
    pub fn ack_offset(&self) -> Option<u64> {
        if self
            .args
            .first()
            .is_some_and(|arg| arg.eq_ignore_ascii_case("ACK"))
        {
            return self.args.get(1).and_then(|offset| offset.parse().ok());
        }
        None
    }
}

impl ParseCommand for Replconf {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("REPLCONF".to_string()));
        }
        let str_args = args
            .iter()
            .map(extract_string)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Replconf { args: str_args })
    }
}

#[async_trait]
impl ExecutableCommand for Replconf {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "REPLCONF is handled by the connection layer".into(),
        ))
    }
}

impl CommandSpec for Replconf {
    fn name(&self) -> &'static str {
        "replconf"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::ADMIN | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.args.iter().map(|s| s.clone().into()).collect()
    }
}
