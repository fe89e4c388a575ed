// src/core/commands/string/set.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::{extract_bytes, extract_string, extract_u64};
use crate::core::protocol::RespFrame;
use crate::core::storage::StoredValue;
use crate::core::storage::data_types::now_ms;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

/// How an expiration was requested. Relative forms are rewritten to the
/// absolute `Pxat` form before propagation so replicas and the AOF apply the
/// exact same deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpiry {
    Ex(u64),
    Px(u64),
    Pxat(u64),
}

impl SetExpiry {
    pub fn absolute_ms(&self) -> u64 {
        match self {
            SetExpiry::Ex(secs) => now_ms() + secs * 1000,
            SetExpiry::Px(ms) => now_ms() + ms,
            SetExpiry::Pxat(at) => *at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub nx: bool,
    pub xx: bool,
    pub expiry: Option<SetExpiry>,
}

impl ParseCommand for Set {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if args.len() < 2 {
            return Err(CitrineError::WrongArgumentCount("SET".to_string()));
        }
        let mut cmd = Set {
            key: extract_bytes(&args[0])?,
            value: extract_bytes(&args[1])?,
            ..Set::default()
        };

        let mut i = 2;
        while i < args.len() {
            let option = extract_string(&args[i])?.to_ascii_uppercase();
            match option.as_str() {
                "NX" => cmd.nx = true,
                "XX" => cmd.xx = true,
                "EX" | "PX" | "PXAT" => {
                    i += 1;
                    let amount = extract_u64(args.get(i).ok_or(CitrineError::SyntaxError)?)?;
                    if amount == 0 {
                        return Err(CitrineError::InvalidState(
                            "invalid expire time in 'set' command".to_string(),
                        ));
                    }
                    cmd.expiry = Some(match option.as_str() {
                        "EX" => SetExpiry::Ex(amount),
                        "PX" => SetExpiry::Px(amount),
                        _ => SetExpiry::Pxat(amount),
                    });
                }
                _ => return Err(CitrineError::SyntaxError),
            }
            i += 1;
        }

        if cmd.nx && cmd.xx {
            return Err(CitrineError::SyntaxError);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl ExecutableCommand for Set {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        let exists = ctx.db.contains(&self.key);
        if (self.nx && exists) || (self.xx && !exists) {
            return Ok((RespValue::Null, WriteOutcome::DidNotWrite));
        }

        let stored = match self.expiry {
            Some(expiry) => StoredValue::with_expiry(self.value.clone(), expiry.absolute_ms()),
            None => StoredValue::new(self.value.clone()),
        };
        ctx.db.set(self.key.clone(), stored);
        Ok((
            RespValue::SimpleString("OK".into()),
            WriteOutcome::Write { keys_modified: 1 },
        ))
    }
}

impl CommandSpec for Set {
    fn name(&self) -> &'static str {
        "set"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        let mut args = vec![self.key.clone(), self.value.clone()];
        if self.nx {
            args.push(Bytes::from_static(b"NX"));
        }
        if self.xx {
            args.push(Bytes::from_static(b"XX"));
        }
        match self.expiry {
            Some(SetExpiry::Ex(secs)) => {
                args.push(Bytes::from_static(b"EX"));
                args.push(secs.to_string().into());
            }
            Some(SetExpiry::Px(ms)) => {
                args.push(Bytes::from_static(b"PX"));
                args.push(ms.to_string().into());
            }
            Some(SetExpiry::Pxat(at)) => {
                args.push(Bytes::from_static(b"PXAT"));
                args.push(at.to_string().into());
            }
            None => {}
        }
        args
    }
}
