// src/core/mod.rs

//! The central module containing the core logic and data structures of CitrineDB.

pub mod commands;
pub mod errors;
pub mod events;
pub mod handler;
pub mod persistence;
pub mod protocol;
pub mod replication;
pub mod scripting;
pub mod state;
pub mod storage;

pub use commands::Command;
pub use errors::CitrineError;
pub use protocol::RespValue;
