// src/core/commands/command_trait.rs

//! Defines the core traits for all executable commands.

use crate::core::commands::ExecutionContext;
use crate::core::protocol::RespFrame;
use crate::core::{CitrineError, RespValue};
use async_trait::async_trait;
use bitflags::bitflags;

bitflags! {
    /// Flags that describe the properties and behavior of a command.
    /// These are used by the router and other subsystems to handle commands appropriately.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CommandFlags: u32 {
        /// The command modifies the dataset.
        const WRITE          = 1 << 0;
        /// The command only reads data.
        const READONLY       = 1 << 1;
        /// An administrative command.
        const ADMIN          = 1 << 2;
        /// The command should not be propagated to replicas or the AOF file.
        const NO_PROPAGATE   = 1 << 3;
        /// A scripting command (`EVAL`/`EVALSHA`/`SCRIPT`).
        const SCRIPTING      = 1 << 4;
    }
}

/// Represents the outcome of a write operation, used to determine if
/// propagation to AOF/replicas is necessary and to update the dirty key counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The command did not modify any data.
    DidNotWrite,
    /// The command modified one or more keys (or performed a replicable
    /// side effect, in which case the count may be zero).
    Write { keys_modified: u64 },
    /// The command deleted one or more keys.
    Delete { keys_deleted: u64 },
    /// The command flushed the entire dataset (e.g., `FLUSHALL`).
    Flush,
}

/// A trait for the actual execution logic of a command.
/// Implemented by each command's struct (e.g., `Get`, `Set`).
#[async_trait]
pub trait ExecutableCommand {
    /// The core logic for the command's execution.
    async fn execute<'a>(
        &self,
        ctx: &mut ExecutionContext<'a>,
    ) -> Result<(RespValue, WriteOutcome), CitrineError>;
}

/// A trait for parsing a command's arguments from a slice of `RespFrame`.
pub trait ParseCommand: Sized {
    /// Parses the arguments and returns an instance of the command struct.
    fn parse(args: &[RespFrame]) -> Result<Self, CitrineError>;
}
