// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum CitrineError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Syntax error")]
    SyntaxError,

    #[error("Wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("Value is not an integer or out of range")]
    NotAnInteger,

    #[error("Increment or decrement would overflow")]
    Overflow,

    #[error("NOAUTH Authentication required")]
    AuthRequired,

    #[error("WRONGPASS invalid password")]
    InvalidPassword,

    #[error("Command not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("READONLY {0}")]
    ReadOnly(String),

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,

    #[error("Script Error: {0}")]
    ScriptError(String),

    #[error("Persistence Error: {0}")]
    PersistenceError(String),

    #[error("Replication Error: {0}")]
    ReplicationError(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for CitrineError {
    fn clone(&self) -> Self {
        match self {
            CitrineError::Io(e) => CitrineError::Io(Arc::clone(e)),
            CitrineError::IncompleteData => CitrineError::IncompleteData,
            CitrineError::ProtocolError(s) => CitrineError::ProtocolError(s.clone()),
            CitrineError::UnknownCommand(s) => CitrineError::UnknownCommand(s.clone()),
            CitrineError::SyntaxError => CitrineError::SyntaxError,
            CitrineError::WrongArgumentCount(s) => CitrineError::WrongArgumentCount(s.clone()),
            CitrineError::WrongType => CitrineError::WrongType,
            CitrineError::NotAnInteger => CitrineError::NotAnInteger,
            CitrineError::Overflow => CitrineError::Overflow,
            CitrineError::AuthRequired => CitrineError::AuthRequired,
            CitrineError::InvalidPassword => CitrineError::InvalidPassword,
            CitrineError::InvalidState(s) => CitrineError::InvalidState(s.clone()),
            CitrineError::ReadOnly(s) => CitrineError::ReadOnly(s.clone()),
            CitrineError::NoScript => CitrineError::NoScript,
            CitrineError::ScriptError(s) => CitrineError::ScriptError(s.clone()),
            CitrineError::PersistenceError(s) => CitrineError::PersistenceError(s.clone()),
            CitrineError::ReplicationError(s) => CitrineError::ReplicationError(s.clone()),
            CitrineError::Internal(s) => CitrineError::Internal(s.clone()),
        }
    }
}

impl PartialEq for CitrineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CitrineError::Io(e1), CitrineError::Io(e2)) => e1.to_string() == e2.to_string(),
            (CitrineError::ProtocolError(s1), CitrineError::ProtocolError(s2)) => s1 == s2,
            (CitrineError::UnknownCommand(s1), CitrineError::UnknownCommand(s2)) => s1 == s2,
            (CitrineError::WrongArgumentCount(s1), CitrineError::WrongArgumentCount(s2)) => {
                s1 == s2
            }
            (CitrineError::InvalidState(s1), CitrineError::InvalidState(s2)) => s1 == s2,
            (CitrineError::ReadOnly(s1), CitrineError::ReadOnly(s2)) => s1 == s2,
            (CitrineError::ScriptError(s1), CitrineError::ScriptError(s2)) => s1 == s2,
            (CitrineError::PersistenceError(s1), CitrineError::PersistenceError(s2)) => s1 == s2,
            (CitrineError::ReplicationError(s1), CitrineError::ReplicationError(s2)) => s1 == s2,
            (CitrineError::Internal(s1), CitrineError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for CitrineError {
    fn from(e: std::io::Error) -> Self {
        CitrineError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for CitrineError {
    fn from(_: std::str::Utf8Error) -> Self {
        CitrineError::WrongType
    }
}

impl From<std::string::FromUtf8Error> for CitrineError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        CitrineError::WrongType
    }
}

impl From<ParseIntError> for CitrineError {
    fn from(_: ParseIntError) -> Self {
        CitrineError::NotAnInteger
    }
}

impl From<mlua::Error> for CitrineError {
    fn from(e: mlua::Error) -> Self {
        CitrineError::ScriptError(e.to_string())
    }
}
