// src/core/scripting/mod.rs

//! Server-side Lua scripting: a digest-addressed script registry and a
//! sandboxed evaluator.
//!
//! Scripts see `KEYS` and `ARGV` globals plus a small `store` API bound to the
//! currently selected database. Execution is deterministic, which is what
//! allows `EVAL`/`EVALSHA` to be replayed verbatim on replicas and from the
//! append-only file.

use crate::core::CitrineError;
use crate::core::protocol::RespValue;
use crate::core::storage::{Db, StoredValue};
use bytes::Bytes;
use dashmap::DashMap;
use mlua::{Lua, Value};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stores script bodies keyed by their lowercase SHA-1 hex digest.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: DashMap<String, Bytes>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
        }
    }

    /// Computes the SHA-1 hex digest of a script body.
    pub fn digest(body: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    /// Registers a script body and returns its digest.
    pub fn load(&self, body: Bytes) -> String {
        let sha = Self::digest(&body);
        self.scripts.insert(sha.clone(), body);
        sha
    }

    pub fn get(&self, sha: &str) -> Option<Bytes> {
        self.scripts
            .get(&sha.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn exists(&self, sha: &str) -> bool {
        self.scripts.contains_key(&sha.to_ascii_lowercase())
    }

    pub fn flush(&self) {
        self.scripts.clear();
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Snapshot of every registered script, used when a primary ships its
    /// script state to a freshly synchronized replica.
    pub fn all_scripts(&self) -> Vec<(String, Bytes)> {
        self.scripts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// The result of evaluating a script: the RESP reply plus how many keys the
/// script wrote (which decides whether the command is propagated).
#[derive(Debug)]
pub struct EvalOutcome {
    pub value: RespValue,
    pub keys_written: u64,
}

/// Evaluates a Lua script against one database.
///
/// A fresh interpreter is created per call; scripts are expected to be small
/// and side-effect free outside the provided `store` API. With `writable`
/// false (a normal client talking to a replica), mutation attempts raise a
/// Lua error instead of diverging the replicated dataset.
pub fn eval_script(
    body: &Bytes,
    keys: &[Bytes],
    args: &[Bytes],
    db: &Arc<Db>,
    writable: bool,
) -> Result<EvalOutcome, CitrineError> {
    let lua = Lua::new();
    let writes = Arc::new(AtomicU64::new(0));

    let globals = lua.globals();

    let keys_table = lua.create_table()?;
    for (i, key) in keys.iter().enumerate() {
        keys_table.set(i + 1, lua.create_string(key)?)?;
    }
    globals.set("KEYS", keys_table)?;

    let argv_table = lua.create_table()?;
    for (i, arg) in args.iter().enumerate() {
        argv_table.set(i + 1, lua.create_string(arg)?)?;
    }
    globals.set("ARGV", argv_table)?;

    let store = lua.create_table()?;

    let get_db = db.clone();
    store.set(
        "get",
        lua.create_function(move |lua, key: mlua::String| {
            let key = Bytes::copy_from_slice(&key.as_bytes());
            match get_db.get(&key) {
                Some(value) => Ok(Value::String(lua.create_string(&value.data)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    let set_db = db.clone();
    let set_writes = writes.clone();
    store.set(
        "set",
        lua.create_function(move |_, (key, value): (mlua::String, mlua::String)| {
            if !writable {
                return Err(read_only_error());
            }
            let key = Bytes::copy_from_slice(&key.as_bytes());
            let value = Bytes::copy_from_slice(&value.as_bytes());
            set_db.set(key, StoredValue::new(value));
            set_writes.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        })?,
    )?;

    let del_db = db.clone();
    let del_writes = writes.clone();
    store.set(
        "del",
        lua.create_function(move |_, key: mlua::String| {
            if !writable {
                return Err(read_only_error());
            }
            let key = Bytes::copy_from_slice(&key.as_bytes());
            let removed = del_db.remove(&key);
            if removed {
                del_writes.fetch_add(1, Ordering::Relaxed);
            }
            Ok(removed)
        })?,
    )?;

    globals.set("store", store)?;

    let result: Value = lua.load(&body[..]).set_name("@user_script").eval()?;

    Ok(EvalOutcome {
        value: lua_value_to_resp(result),
        keys_written: writes.load(Ordering::Relaxed),
    })
}

fn read_only_error() -> mlua::Error {
    mlua::Error::RuntimeError(
        "READONLY You can't write against a read only replica.".to_string(),
    )
}

/// Maps a Lua value onto its RESP reply following the usual conventions:
/// `true` becomes 1, `false` becomes a null reply, numbers are truncated to
/// integers, and tables are read as sequences.
fn lua_value_to_resp(value: Value) -> RespValue {
    match value {
        Value::Nil => RespValue::Null,
        Value::Boolean(b) => {
            if b {
                RespValue::Integer(1)
            } else {
                RespValue::Null
            }
        }
        Value::Integer(i) => RespValue::Integer(i),
        Value::Number(n) => RespValue::Integer(n as i64),
        Value::String(s) => RespValue::BulkString(Bytes::copy_from_slice(&s.as_bytes())),
        Value::Table(table) => {
            let mut items = Vec::new();
            let len = table.raw_len();
            for i in 1..=len {
                match table.raw_get::<Value>(i) {
                    Ok(Value::Nil) | Err(_) => break,
                    Ok(item) => items.push(lua_value_to_resp(item)),
                }
            }
            RespValue::Array(items)
        }
        _ => RespValue::Null,
    }
}
