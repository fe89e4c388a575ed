// src/core/commands/mod.rs

//! This module defines all supported commands, organizes them into categories,
//! and provides the central `Command` enum that encapsulates their parsed state.
//! The `define_commands!` macro generates the enum and its core
//! implementations, reducing boilerplate and ensuring consistency.

use crate::core::commands::command_spec::CommandSpec;
use crate::core::commands::command_trait::{
    CommandFlags, ExecutableCommand, ParseCommand, WriteOutcome,
};
use crate::core::commands::helpers::extract_string;
use crate::core::protocol::RespFrame;
use crate::core::state::ServerState;
use crate::core::storage::Db;
use crate::core::{CitrineError, RespValue};
use bytes::Bytes;
use std::sync::Arc;

pub mod command_spec;
pub mod command_trait;
pub mod generic;
pub mod helpers;
pub mod string;

/// Everything a command implementation may touch while executing: the shared
/// server state plus the database the session currently has selected.
pub struct ExecutionContext<'a> {
    pub state: Arc<ServerState>,
    pub db: &'a Arc<Db>,
    pub db_index: usize,
    /// The id of the session executing the command. The replication apply
    /// path and the AOF loader use session id 0.
    pub session_id: u64,
}

macro_rules! define_commands {
    ( $( ($variant:ident, $command:ty, $wire_name:literal) ),+ $(,)? ) => {
        /// The central enum over every parsed command the server understands.
        #[derive(Debug, Clone)]
        pub enum Command {
            $( $variant($command), )+
        }

        impl Command {
            pub fn name(&self) -> &'static str {
                match self {
                    $( Command::$variant(cmd) => cmd.name(), )+
                }
            }

            pub fn get_flags(&self) -> CommandFlags {
                match self {
                    $( Command::$variant(cmd) => cmd.flags(), )+
                }
            }

            pub fn to_resp_args(&self) -> Vec<Bytes> {
                match self {
                    $( Command::$variant(cmd) => cmd.to_resp_args(), )+
                }
            }

            /// Executes the command against the given context.
            pub async fn execute<'a>(
                &self,
                ctx: &mut ExecutionContext<'a>,
            ) -> Result<(RespValue, WriteOutcome), CitrineError> {
                match self {
                    $( Command::$variant(cmd) => cmd.execute(ctx).await, )+
                }
            }

            fn parse_by_name(name: &str, args: &[RespFrame]) -> Result<Command, CitrineError> {
                match name {
                    $( $wire_name => Ok(Command::$variant(<$command as ParseCommand>::parse(args)?)), )+
                    _ => Err(CitrineError::UnknownCommand(name.to_string())),
                }
            }
        }
    };
}

define_commands! {
    // --- Connection & server commands ---
    (Ping, generic::Ping, "ping"),
    (Echo, generic::Echo, "echo"),
    (Auth, generic::Auth, "auth"),
    (Select, generic::Select, "select"),
    (Quit, generic::Quit, "quit"),
    (Info, generic::Info, "info"),
    (Role, generic::Role, "role"),
    (DbSize, generic::DbSize, "dbsize"),
    (FlushAll, generic::FlushAll, "flushall"),
    (Keys, generic::Keys, "keys"),
    (Exists, generic::Exists, "exists"),
    (Del, generic::Del, "del"),
    (Expire, generic::Expire, "expire"),
    (PExpireAt, generic::PExpireAt, "pexpireat"),
    (Ttl, generic::Ttl, "ttl"),
    (Persist, generic::Persist, "persist"),
    (Save, generic::Save, "save"),
    (BgSave, generic::BgSave, "bgsave"),

    // --- Replication commands ---
    (ReplicaOf, generic::ReplicaOf, "replicaof"),
    (Replconf, generic::Replconf, "replconf"),
    (Psync, generic::Psync, "psync"),
    (Sync, generic::Sync, "sync"),
    (Wait, generic::Wait, "wait"),

    // --- Scripting commands ---
    (Script, generic::Script, "script"),
    (Eval, generic::Eval, "eval"),
    (EvalSha, generic::EvalSha, "evalsha"),

    // --- String commands ---
    (Get, string::Get, "get"),
    (Set, string::Set, "set"),
    (Append, string::Append, "append"),
    (StrLen, string::StrLen, "strlen"),
    (Incr, string::Incr, "incr"),
    (Decr, string::Decr, "decr"),
    (IncrBy, string::IncrBy, "incrby"),
    (DecrBy, string::DecrBy, "decrby"),
    (MGet, string::MGet, "mget"),
    (MSet, string::MSet, "mset"),
}

impl TryFrom<RespFrame> for Command {
    type Error = CitrineError;

    fn try_from(frame: RespFrame) -> Result<Self, Self::Error> {
        let RespFrame::Array(frames) = frame else {
            return Err(CitrineError::ProtocolError(
                "expected a command array".to_string(),
            ));
        };
        let Some((name_frame, args)) = frames.split_first() else {
            return Err(CitrineError::ProtocolError("empty command".to_string()));
        };

        let mut name = extract_string(name_frame)?.to_ascii_lowercase();
        // Historical alias.
        if name == "slaveof" {
            name = "replicaof".to_string();
        }
        Command::parse_by_name(&name, args)
    }
}

impl From<Command> for RespFrame {
    fn from(cmd: Command) -> Self {
        let mut parts = vec![RespFrame::BulkString(Bytes::from(
            cmd.name().to_ascii_uppercase(),
        ))];
        parts.extend(cmd.to_resp_args().into_iter().map(RespFrame::BulkString));
        RespFrame::Array(parts)
    }
}

/// Applies a command from the replication stream or the AOF against a
/// database, bypassing the client-facing router.
pub async fn apply_write_command(
    state: &Arc<ServerState>,
    db_index: usize,
    command: &Command,
) -> Result<WriteOutcome, CitrineError> {
    let db = state
        .get_db(db_index)
        .ok_or_else(|| CitrineError::Internal("invalid database index".into()))?;
    let mut ctx = ExecutionContext {
        state: state.clone(),
        db: &db,
        db_index,
        session_id: 0,
    };
    let (_, outcome) = command.execute(&mut ctx).await?;
    Ok(outcome)
}
