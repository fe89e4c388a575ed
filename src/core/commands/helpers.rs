// src/core/commands/helpers.rs

//! Provides helper functions for parsing command arguments from `RespFrame`s.
//! These helpers reduce boilerplate and ensure consistent error handling across commands.

use crate::core::CitrineError;
use crate::core::protocol::RespFrame;
use bytes::Bytes;

/// Ensures a command received exactly `expected` arguments.
pub fn validate_arg_count(
    args: &[RespFrame],
    expected: usize,
    command_name: &str,
) -> Result<(), CitrineError> {
    if args.len() != expected {
        return Err(CitrineError::WrongArgumentCount(
            command_name.to_string(),
        ));
    }
    Ok(())
}

/// Extracts the raw bytes of a bulk-string argument.
pub fn extract_bytes(frame: &RespFrame) -> Result<Bytes, CitrineError> {
    match frame {
        RespFrame::BulkString(b) => Ok(b.clone()),
        _ => Err(CitrineError::WrongType),
    }
}

/// Extracts a UTF-8 string from a bulk-string argument.
pub fn extract_string(frame: &RespFrame) -> Result<String, CitrineError> {
    let bytes = extract_bytes(frame)?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Extracts an integer from a bulk-string argument.
pub fn extract_i64(frame: &RespFrame) -> Result<i64, CitrineError> {
    let s = extract_string(frame)?;
    s.parse::<i64>().map_err(|_| CitrineError::NotAnInteger)
}

/// Extracts a non-negative integer from a bulk-string argument.
pub fn extract_u64(frame: &RespFrame) -> Result<u64, CitrineError> {
    let s = extract_string(frame)?;
    s.parse::<u64>().map_err(|_| CitrineError::NotAnInteger)
}
