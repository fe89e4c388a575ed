// src/core/commands/generic/evalsha.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::generic::eval::{parse_script_tail, run_script};
use crate::core::commands::helpers::extract_string;
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct EvalSha {
    pub sha1: String,
    pub num_keys: usize,
    pub keys: Vec<Bytes>,
    pub args: Vec<Bytes>,
}

impl ParseCommand for EvalSha {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.len() < 2 {
            return Err(CitrineError::WrongArgumentCount("EVALSHA".to_string()));
        }
        let sha1 = extract_string(&args[0])?.to_ascii_lowercase();
        let (num_keys, keys, script_args) = parse_script_tail(&args[1..], "EVALSHA")?;
        Ok(EvalSha {
            sha1,
            num_keys,
            keys,
            args: script_args,
        })
    }
}

#[async_trait]
impl ExecutableCommand for EvalSha {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let body = ctx
            .state
            .scripting
            .get(&self.sha1)
            .ok_or(CitrineError::NoScript)?;
        run_script(ctx, &body, &self.keys, &self.args).await
    }
}

impl CommandSpec for EvalSha {
    fn name(&self) -> &'static str {
        "evalsha"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::SCRIPTING
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        let mut args = vec![
            Bytes::from(self.sha1.clone()),
            self.num_keys.to_string().into(),
        ];
        args.extend(self.keys.iter().cloned());
        args.extend(self.args.iter().cloned());
        args
    }
}
