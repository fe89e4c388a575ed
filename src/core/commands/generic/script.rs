// src/core/commands/generic/script.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, extract_string};
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub enum ScriptSubcommand {
    Load(Bytes),
    Exists(Vec<String>),
    Flush,
}

impl Default for ScriptSubcommand {
    fn default() -> Self {
        ScriptSubcommand::Flush
    }
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub subcommand: ScriptSubcommand,
}

impl ParseCommand for Script {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("SCRIPT".to_string()));
        }
        let sub = extract_string(&args[0])?.to_ascii_uppercase();
        let subcommand = match sub.as_str() {
            "LOAD" => {
                if args.len() != 2 {
                    return Err(CitrineError::WrongArgumentCount("SCRIPT LOAD".to_string()));
                }
                ScriptSubcommand::Load(extract_bytes(&args[1])?)
            }
            "EXISTS" => {
                let digests = args[1..]
                    .iter()
                    .map(extract_string)
                    .collect::<Result<Vec<_>, _>>()?;
                ScriptSubcommand::Exists(digests)
            }
            "FLUSH" => {
                if args.len() != 1 {
                    return Err(CitrineError::WrongArgumentCount("SCRIPT FLUSH".to_string()));
                }
                ScriptSubcommand::Flush
            }
            _ => {
                return Err(CitrineError::UnknownCommand(format!("SCRIPT {sub}")));
            }
        };
        Ok(Script { subcommand })
    }
}

#[async_trait]
impl ExecutableCommand for Script {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        match &self.subcommand {
            ScriptSubcommand::Load(body) => {
                let sha = ctx.state.scripting.load(body.clone());
                // Loading has no keyspace effect but must still reach the
                // replicas so their registries stay in sync.
                Ok((
                    RespValue::BulkString(sha.into()),
                    WriteOutcome::Write { keys_modified: 0 },
                ))
            }
            ScriptSubcommand::Exists(digests) => {
                let replies = digests
                    .iter()
                    .map(|sha| RespValue::Integer(ctx.state.scripting.exists(sha) as i64))
                    .collect();
                Ok((RespValue::Array(replies), WriteOutcome::DidNotWrite))
            }
            ScriptSubcommand::Flush => {
                ctx.state.scripting.flush();
                ctx.state.replicated_scripts.clear().await;
                Ok((
                    RespValue::SimpleString("OK".into()),
                    WriteOutcome::Write { keys_modified: 0 },
                ))
            }
        }
    }
}

impl CommandSpec for Script {
    fn name(&self) -> &'static str {
        "script"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::SCRIPTING
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        match &self.subcommand {
            ScriptSubcommand::Load(body) => {
                vec![Bytes::from_static(b"LOAD"), body.clone()]
            }
            ScriptSubcommand::Exists(digests) => {
                let mut args = vec![Bytes::from_static(b"EXISTS")];
                args.extend(digests.iter().map(|sha| Bytes::from(sha.clone())));
                args
            }
            ScriptSubcommand::Flush => vec![Bytes::from_static(b"FLUSH")],
        }
    }
}
