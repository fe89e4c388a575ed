// src/core/commands/string/mset.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::extract_bytes;
use crate::core::protocol::RespFrame;
use crate::core::storage::StoredValue;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct MSet {
    pub pairs: Vec<(Bytes, Bytes)>,
}

impl ParseCommand for MSet {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(CitrineError::WrongArgumentCount("MSET".to_string()));
        }
        let pairs = args
            .chunks_exact(2)
            .map(|chunk| Ok((extract_bytes(&chunk[0])?, extract_bytes(&chunk[1])?)))
            .collect::<Result<_, CitrineError>>()?;
        Ok(MSet { pairs })
    }
}

#[async_trait]
impl ExecutableCommand for MSet {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        for (key, value) in &self.pairs {
            ctx.db.set(key.clone(), StoredValue::new(value.clone()));
        }
        Ok((
            RespValue::SimpleString("OK".into()),
            WriteOutcome::Write {
                keys_modified: self.pairs.len() as u64,
            },
        ))
    }
}

impl CommandSpec for MSet {
    fn name(&self) -> &'static str {
        "mset"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        self.pairs
            .iter()
            .flat_map(|(key, value)| [key.clone(), value.clone()])
            .collect()
    }
}
