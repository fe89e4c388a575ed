// src/core/persistence/ctdb.rs

//! Implements the CTDB (CitrineDB snapshot) format.
//!
//! A CTDB image is the unit of full resynchronization: the primary serializes
//! its dataset with `save_to_bytes` and streams it to a replica, which loads
//! it with `load_from_bytes` after writing it to disk. The same format backs
//! SAVE/BGSAVE and the startup load.
//!
//! Layout: `CITRINE` magic, 4-byte version, then a sequence of opcodes
//! (select-db, expire-time-ms, string record) terminated by EOF and a CRC-64
//! trailer over everything preceding it.

use crate::core::CitrineError;
use crate::core::state::ServerState;
use crate::core::storage::data_types::now_ms;
use crate::core::storage::{Db, StoredValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{CRC_64_REDIS, Crc};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

// --- CTDB Constants ---
const CTDB_MAGIC: &[u8] = b"CITRINE";
const CTDB_VERSION: &[u8] = b"0001";

const CTDB_OPCODE_SELECTDB: u8 = 0xFE;
const CTDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const CTDB_OPCODE_EOF: u8 = 0xFF;

const CTDB_TYPE_STRING: u8 = 0;

const CHECKSUM_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// A point-in-time copy of every non-empty database's live entries.
pub type CollectedEntries = Vec<(usize, Vec<(Bytes, StoredValue)>)>;

/// Clones the live entries out of every database. Cheap relative to
/// serialization since values are reference-counted buffers.
pub fn collect_entries(dbs: &[Arc<Db>]) -> CollectedEntries {
    dbs.iter()
        .enumerate()
        .filter_map(|(db_index, db)| {
            let entries = db.all_entries();
            (!entries.is_empty()).then_some((db_index, entries))
        })
        .collect()
}

/// Serializes a collected dataset into a CTDB image.
pub fn encode_image(collected: &CollectedEntries) -> Bytes {
    let mut out = BytesMut::new();
    out.put_slice(CTDB_MAGIC);
    out.put_slice(CTDB_VERSION);

    for (db_index, entries) in collected {
        out.put_u8(CTDB_OPCODE_SELECTDB);
        out.put_u32(*db_index as u32);

        for (key, value) in entries {
            if let Some(at) = value.expires_at_ms {
                out.put_u8(CTDB_OPCODE_EXPIRETIME_MS);
                out.put_u64(at);
            }
            out.put_u8(CTDB_TYPE_STRING);
            write_bytes(&mut out, key);
            write_bytes(&mut out, &value.data);
        }
    }

    out.put_u8(CTDB_OPCODE_EOF);
    let checksum = CHECKSUM_ALGO.checksum(&out);
    out.put_u64(checksum);
    out.freeze()
}

/// Serializes every live key of every database into an in-memory CTDB image.
pub async fn save_to_bytes(dbs: &[Arc<Db>]) -> Result<Bytes, CitrineError> {
    Ok(encode_image(&collect_entries(dbs)))
}

/// Parses a CTDB image and loads its records into the given databases.
/// Records whose expiry has already passed are skipped.
pub async fn load_from_bytes(data: &Bytes, dbs: &[Arc<Db>]) -> Result<(), CitrineError> {
    if data.len() < CTDB_MAGIC.len() + CTDB_VERSION.len() + 1 + 8 {
        return Err(corrupt("image too short"));
    }

    let (body, trailer) = data.split_at(data.len() - 8);
    let expected = u64::from_be_bytes(
        trailer
            .try_into()
            .map_err(|_| corrupt("bad checksum trailer"))?,
    );
    if CHECKSUM_ALGO.checksum(body) != expected {
        return Err(corrupt("checksum mismatch"));
    }

    let mut cursor = &body[..];
    if !cursor.starts_with(CTDB_MAGIC) {
        return Err(corrupt("bad magic"));
    }
    cursor.advance(CTDB_MAGIC.len() + CTDB_VERSION.len());

    let mut current_db: usize = 0;
    let mut pending_expiry: Option<u64> = None;

    loop {
        let opcode = read_u8(&mut cursor)?;
        match opcode {
            CTDB_OPCODE_EOF => return Ok(()),
            CTDB_OPCODE_SELECTDB => {
                let index = read_u32(&mut cursor)? as usize;
                if index >= dbs.len() {
                    return Err(corrupt("database index out of range"));
                }
                current_db = index;
            }
            CTDB_OPCODE_EXPIRETIME_MS => {
                pending_expiry = Some(read_u64(&mut cursor)?);
            }
            CTDB_TYPE_STRING => {
                let key = read_bytes(&mut cursor)?;
                let value = read_bytes(&mut cursor)?;
                let expiry = pending_expiry.take();
                if expiry.is_some_and(|at| at <= now_ms()) {
                    continue;
                }
                let stored = match expiry {
                    Some(at) => StoredValue::with_expiry(value, at),
                    None => StoredValue::new(value),
                };
                dbs[current_db].set(key, stored);
            }
            other => return Err(corrupt(&format!("unknown opcode {other:#x}"))),
        }
    }
}

/// Saves all databases to a file, going through a temp file and an atomic
/// rename so a crash never leaves a half-written snapshot behind.
pub async fn save_to_file(path: &str, dbs: &[Arc<Db>]) -> Result<(), CitrineError> {
    let payload = save_to_bytes(dbs).await?;
    if let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = format!("{path}.tmp-{}", std::process::id());
    fs::write(&temp_path, &payload).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

/// Loads a CTDB file into the databases. Returns false when the file does not
/// exist (a fresh start, not an error).
pub async fn load_from_file(path: &str, dbs: &[Arc<Db>]) -> Result<bool, CitrineError> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if data.is_empty() {
        warn!("CTDB file at {} is empty, starting fresh.", path);
        return Ok(false);
    }
    load_from_bytes(&Bytes::from(data), dbs).await?;
    Ok(true)
}

/// Loads the configured snapshot at startup.
pub struct CtdbLoader {
    config: crate::config::PersistenceConfig,
}

impl CtdbLoader {
    pub fn new(config: crate::config::PersistenceConfig) -> Self {
        Self { config }
    }

    pub async fn load_into(&self, state: &Arc<ServerState>) -> Result<(), CitrineError> {
        let path = &self.config.ctdb_path;
        if load_from_file(path, &state.dbs).await? {
            info!("Successfully loaded database from CTDB file {}", path);
        } else {
            info!(
                "CTDB file not found at {}. Starting with an empty database.",
                path
            );
        }
        Ok(())
    }
}

fn write_bytes(out: &mut BytesMut, data: &[u8]) {
    out.put_u32(data.len() as u32);
    out.put_slice(data);
}

fn read_u8(cursor: &mut &[u8]) -> Result<u8, CitrineError> {
    if !cursor.has_remaining() {
        return Err(corrupt("unexpected end of image"));
    }
    Ok(cursor.get_u8())
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32, CitrineError> {
    if cursor.remaining() < 4 {
        return Err(corrupt("unexpected end of image"));
    }
    Ok(cursor.get_u32())
}

fn read_u64(cursor: &mut &[u8]) -> Result<u64, CitrineError> {
    if cursor.remaining() < 8 {
        return Err(corrupt("unexpected end of image"));
    }
    Ok(cursor.get_u64())
}

fn read_bytes(cursor: &mut &[u8]) -> Result<Bytes, CitrineError> {
    let len = read_u32(cursor)? as usize;
    if cursor.remaining() < len {
        return Err(corrupt("unexpected end of image"));
    }
    let data = Bytes::copy_from_slice(&cursor[..len]);
    cursor.advance(len);
    Ok(data)
}

fn corrupt(detail: &str) -> CitrineError {
    CitrineError::PersistenceError(format!("corrupt CTDB image: {detail}"))
}
