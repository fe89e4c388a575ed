// src/connection/session.rs

//! Defines the state associated with a single client session.

/// Holds the state specific to a single client session.
#[derive(Debug)]
pub struct SessionState {
    /// True if the client has successfully authenticated.
    pub is_authenticated: bool,
    /// The index of the database the client is currently using.
    pub current_db_index: usize,
}

impl SessionState {
    /// Creates a new `SessionState` with default values.
    pub(crate) fn new(is_auth_required: bool) -> Self {
        Self {
            is_authenticated: !is_auth_required,
            current_db_index: 0,
        }
    }
}
