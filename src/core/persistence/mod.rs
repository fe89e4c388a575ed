// src/core/persistence/mod.rs

//! This module contains all logic related to data persistence: the CTDB
//! snapshot format and the Append-Only File (AOF).
//!
//! It is responsible for loading data from disk on startup, saving data to
//! disk during runtime, and rebuilding the AOF after a full resynchronization
//! replaces the dataset.

mod aof;
pub mod ctdb;

pub use aof::{AofLoader, AofWriterTask};
pub use ctdb::CtdbLoader;
