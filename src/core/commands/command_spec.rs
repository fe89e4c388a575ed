// src/core/commands/command_spec.rs

//! Defines the `CommandSpec` trait, carrying the static description of a
//! command: its wire name, behavior flags, and how to render its arguments
//! back into RESP for propagation.

use crate::core::commands::command_trait::CommandFlags;
use bytes::Bytes;

pub trait CommandSpec {
    fn name(&self) -> &'static str;
    fn flags(&self) -> CommandFlags;
    fn to_resp_args(&self) -> Vec<Bytes>;
}
