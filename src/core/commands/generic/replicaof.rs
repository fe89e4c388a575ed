// src/core/commands/generic/replicaof.rs

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

/// `REPLICAOF host port` makes this node follow a primary;
/// `REPLICAOF NO ONE` promotes it back to a standalone primary.
#[derive(Debug, Clone, Default)]
pub struct ReplicaOf {
    pub target: Option<(String, u16)>,
}

impl ParseCommand for ReplicaOf {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        validate_arg_count(args, 2, "REPLICAOF")?;
        let host = extract_string(&args[0])?;
        let port = extract_string(&args[1])?;

        if host.eq_ignore_ascii_case("no") && port.eq_ignore_ascii_case("one") {
            return Ok(ReplicaOf { target: None });
        }

        let port: u16 = port.parse().map_err(|_| CitrineError::NotAnInteger)?;
        if port == 0 {
            return Err(CitrineError::InvalidState("invalid port".to_string()));
        }
        Ok(ReplicaOf {
            target: Some((host, port)),
        })
    }
}

#[async_trait]
impl ExecutableCommand for ReplicaOf {
    async fn execute<'a>(
        &self,
        _ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        Err(CitrineError::Internal(
            "REPLICAOF is handled by the connection layer".into(),
        ))
    }
}

impl CommandSpec for ReplicaOf {
    fn name(&self) -> &'static str {
        "replicaof"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::ADMIN | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        match &self.target {
            Some((host, port)) => vec![host.clone().into(), port.to_string().into()],
            None => vec![Bytes::from_static(b"NO"), Bytes::from_static(b"ONE")],
        }
    }
}
