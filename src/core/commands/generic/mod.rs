// src/core/commands/generic/mod.rs

pub mod auth;
pub mod bgsave;
pub mod dbsize;
pub mod del;
pub mod echo;
pub mod eval;
pub mod evalsha;
pub mod exists;
pub mod expire;
pub mod flushall;
pub mod info;
pub mod keys;
pub mod persist;
pub mod ping;
pub mod psync;
pub mod quit;
pub mod replconf;
pub mod replicaof;
pub mod role;
pub mod save;
pub mod script;
pub mod select;
pub mod sync;
pub mod ttl;
pub mod wait;

pub use auth::Auth;
pub use bgsave::BgSave;
pub use dbsize::DbSize;
pub use del::Del;
pub use echo::Echo;
pub use eval::Eval;
pub use evalsha::EvalSha;
pub use exists::Exists;
pub use expire::{Expire, PExpireAt};
pub use flushall::FlushAll;
pub use info::Info;
pub use keys::Keys;
pub use persist::Persist;
pub use ping::Ping;
pub use psync::Psync;
pub use quit::Quit;
pub use replconf::Replconf;
pub use replicaof::ReplicaOf;
pub use role::Role;
pub use save::Save;
pub use script::{Script, ScriptSubcommand};
pub use select::Select;
pub use sync::Sync;
pub use ttl::Ttl;
pub use wait::Wait;
