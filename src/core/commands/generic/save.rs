// src/core/commands/generic/save.rs

use crate::core::commands::ExecutionContext;
use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::persistence::ctdb;
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct Save;

impl ParseCommand for Save {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("SAVE".to_string()));
        }
        Ok(Save)
    }
}

#[async_trait]
impl ExecutableCommand for Save {
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError> {
        if ctx
            .state
            .persistence
            .is_saving_snapshot
            .swap(true, Ordering::AcqRel)
        {
            return Err(CitrineError::InvalidState(
                "A snapshot save is already in progress".to_string(),
            ));
        }

        let path = ctx.state.config.lock().await.persistence.ctdb_path.clone();
        let result = ctdb::save_to_file(&path, &ctx.state.dbs).await;

        ctx.state
            .persistence
            .is_saving_snapshot
            .store(false, Ordering::Release);
        ctx.state.persistence.save_finished.notify_waiters();
        result?;

        *ctx.state.persistence.last_save_success_time.lock().await = Some(Instant::now());
        ctx.state
            .persistence
            .dirty_keys_counter
            .store(0, Ordering::Relaxed);
        // A rewritten snapshot resets what replicas can be assumed to hold.
        ctx.state.replicated_scripts.clear().await;

        Ok((
            RespValue::SimpleString("OK".into()),
            WriteOutcome::DidNotWrite,
        ))
    }
}

impl CommandSpec for Save {
    fn name(&self) -> &'static str {
        "save"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::ADMIN | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
