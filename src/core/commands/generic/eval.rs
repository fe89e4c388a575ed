// src/core/commands/generic/eval.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, extract_u64};
use crate::core::protocol::RespFrame;
use crate::core::scripting;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

/// Parses the `numkeys keys... args...` tail shared by EVAL and EVALSHA.
pub(crate) fn parse_script_tail(
    args: &[RespFrame],
    command_name: &str,
) -> Result<(usize, Vec<Bytes>, Vec<Bytes>), CitrineError> {
    let num_keys = extract_u64(&args[0])? as usize;
    if args.len() < 1 + num_keys {
        return Err(CitrineError::WrongArgumentCount(command_name.to_string()));
    }
    let keys = args[1..1 + num_keys]
        .iter()
        .map(extract_bytes)
        .collect::<Result<Vec<_>, _>>()?;
    let script_args = args[1 + num_keys..]
        .iter()
        .map(extract_bytes)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((num_keys, keys, script_args))
}

/// Runs a script body, deciding first whether it is allowed to write: a
/// normal client on a replica gets a read-only store API, while the
/// replication apply path (session id 0) always may write.
pub(crate) async fn run_script(
    ctx: &mut ExecutionContext<'_>,
    body: &Bytes,
    keys: &[Bytes],
    args: &[Bytes],
) -> Result<(RespValue, WriteOutcome), CitrineError> {
    let is_replica = ctx.state.config.lock().await.replication.is_replica();
    let writable = !(is_replica && ctx.session_id != 0);

    let outcome = scripting::eval_script(body, keys, args, ctx.db, writable)?;
    let write_outcome = if outcome.keys_written > 0 {
        WriteOutcome::Write {
            keys_modified: outcome.keys_written,
        }
    } else {
        WriteOutcome::DidNotWrite
    };
    Ok((outcome.value, write_outcome))
}

#[derive(Debug, Clone, Default)]
pub struct Eval {
    pub script: Bytes,
    pub num_keys: usize,
    pub keys: Vec<Bytes>,
    pub args: Vec<Bytes>,
}

impl ParseCommand for Eval {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.len() < 2 {
            return Err(CitrineError::WrongArgumentCount("EVAL".to_string()));
        }
        let script = extract_bytes(&args[0])?;
        let (num_keys, keys, script_args) = parse_script_tail(&args[1..], "EVAL")?;
        Ok(Eval {
            script,
            num_keys,
            keys,
            args: script_args,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Eval {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        // Every evaluated script is registered so a later EVALSHA resolves.
        ctx.state.scripting.load(self.script.clone());
        run_script(ctx, &self.script, &self.keys, &self.args).await
    }
}

impl CommandSpec for Eval {
    fn name(&self) -> &'static str {
        "eval"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::SCRIPTING
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        let mut args = vec![self.script.clone(), self.num_keys.to_string().into()];
        args.extend(self.keys.iter().cloned());
        args.extend(self.args.iter().cloned());
        args
    }
}
