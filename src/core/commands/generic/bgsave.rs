// src/core/commands/generic/bgsave.rs

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
use tracing::{error, info};

#[derive(Debug, Clone, Default)]
pub struct BgSave;

impl ParseCommand for BgSave {
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError> {
        if !args.is_empty() {
            return Err(CitrineError::WrongArgumentCount("BGSAVE".to_string()));
        }
        Ok(BgSave)
    }
}

#[async_trait]
impl ExecutableCommand for BgSave {
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

        let state = ctx.state.clone();
        tokio::spawn(async move {
            let path = state.config.lock().await.persistence.ctdb_path.clone();
            match ctdb::save_to_file(&path, &state.dbs).await {
                Ok(()) => {
                    *state.persistence.last_save_success_time.lock().await = Some(Instant::now());
                    state
                        .persistence
                        .dirty_keys_counter
                        .store(0, Ordering::Relaxed);
                    state.replicated_scripts.clear().await;
                    info!("Background save finished successfully.");
                }
                Err(e) => error!("Background save failed: {}", e),
            }
            state
                .persistence
                .is_saving_snapshot
                .store(false, Ordering::Release);
            state.persistence.save_finished.notify_waiters();
        });

        Ok((
            RespValue::SimpleString("Background saving started".into()),
            WriteOutcome::DidNotWrite,
        ))
    }
}

impl CommandSpec for BgSave {
    fn name(&self) -> &'static str {
        "bgsave"
    }
    fn flags(&self) -> CommandFlags {
        CommandFlags::ADMIN | CommandFlags::NO_PROPAGATE
    }
    fn to_resp_args(&self) -> Vec<Bytes> {
        vec![]
    }
}
