// src/core/commands/string/mod.rs

pub mod append;
pub mod get;
pub mod incr;
pub mod mget;
pub mod mset;
pub mod set;
pub mod strlen;

pub use append::Append;
pub use get::Get;
pub use incr::{Decr, DecrBy, Incr, IncrBy};
pub use mget::MGet;
pub use mset::MSet;
pub use set::{Set, SetExpiry};
pub use strlen::StrLen;
