// src/config.rs

//! Manages server configuration: loading, parsing, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_databases")]
    pub databases: usize,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub replication_tuning: ReplicationTuningConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7878
}
fn default_databases() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            databases: default_databases(),
            persistence: PersistenceConfig::default(),
            replication: ReplicationConfig::default(),
            replication_tuning: ReplicationTuningConfig::default(),
        }
    }
}

/// Persistence-related settings for the Append-Only File (AOF) and CTDB snapshots.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub aof_enabled: bool,
    #[serde(default = "default_aof_path")]
    pub aof_path: String,
    #[serde(default = "default_appendfsync")]
    pub appendfsync: AppendFsync,
    #[serde(default = "default_ctdb_enabled")]
    pub ctdb_enabled: bool,
    #[serde(default = "default_ctdb_path")]
    pub ctdb_path: String,
}

fn default_aof_path() -> String {
    "citrinedb_data/citrinedb.aof".to_string()
}
fn default_appendfsync() -> AppendFsync {
    AppendFsync::EverySec
}
fn default_ctdb_enabled() -> bool {
    true
}
fn default_ctdb_path() -> String {
    "citrinedb_data/dump.ctdb".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            aof_enabled: false,
            aof_path: default_aof_path(),
            appendfsync: default_appendfsync(),
            ctdb_enabled: default_ctdb_enabled(),
            ctdb_path: default_ctdb_path(),
        }
    }
}

/// Defines the frequency of the `fsync` system call for AOF persistence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppendFsync {
    Always,
    EverySec,
    No,
}

/// Configuration specific to a Primary instance, for data safety policies.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReplicationPrimaryConfig {
    #[serde(default = "default_min_replicas_to_write")]
    pub min_replicas_to_write: usize,
    #[serde(default = "default_min_replicas_max_lag")]
    pub min_replicas_max_lag: u64,
}

fn default_min_replicas_to_write() -> usize {
    0
}
fn default_min_replicas_max_lag() -> u64 {
    10
}

/// Defines the server's role in replication.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ReplicationConfig {
    Primary(ReplicationPrimaryConfig),
    Replica {
        primary_host: String,
        primary_port: u16,
        #[serde(default)]
        primary_auth: Option<String>,
    },
}

impl ReplicationConfig {
    /// True if the node currently follows a primary.
    pub fn is_replica(&self) -> bool {
        matches!(self, ReplicationConfig::Replica { .. })
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::Primary(ReplicationPrimaryConfig::default())
    }
}

/// Knobs shared by both sides of the replication link.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationTuningConfig {
    /// Size of the in-memory backlog ring used for partial resynchronization.
    #[serde(default = "default_backlog_size")]
    pub backlog_size: usize,
    /// How long a primary keeps the backlog alive after the last replica
    /// disconnects. Zero disables the timer.
    #[serde(with = "humantime_serde", default = "default_backlog_ttl")]
    pub backlog_ttl: Duration,
    /// Inactivity window after which a replication peer is considered dead.
    #[serde(with = "humantime_serde", default = "default_repl_timeout")]
    pub repl_timeout: Duration,
    /// Per-step deadline for the bounded synchronous handshake exchanges.
    #[serde(with = "humantime_serde", default = "default_syncio_timeout")]
    pub syncio_timeout: Duration,
    /// Cadence of PING frames to online replicas and newline keepalives to
    /// replicas still waiting for their snapshot.
    #[serde(with = "humantime_serde", default = "default_ping_period")]
    pub ping_period: Duration,
    /// If true, leave Nagle's algorithm enabled on replica sockets after the
    /// snapshot phase to trade latency for fewer, larger packets.
    #[serde(default)]
    pub disable_tcp_nodelay: bool,
}

/// The backlog must hold at least a handshake's worth of traffic to be useful.
pub const MIN_BACKLOG_SIZE: usize = 16 * 1024;

fn default_backlog_size() -> usize {
    1024 * 1024 // 1MB
}
fn default_backlog_ttl() -> Duration {
    Duration::from_secs(3600)
}
fn default_repl_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_syncio_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_ping_period() -> Duration {
    Duration::from_secs(10)
}

impl Default for ReplicationTuningConfig {
    fn default() -> Self {
        Self {
            backlog_size: default_backlog_size(),
            backlog_ttl: default_backlog_ttl(),
            repl_timeout: default_repl_timeout(),
            syncio_timeout: default_syncio_timeout(),
            ping_period: default_ping_period(),
            disable_tcp_nodelay: false,
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.databases == 0 {
            return Err(anyhow!("databases cannot be 0"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.replication_tuning.backlog_size < MIN_BACKLOG_SIZE {
            return Err(anyhow!(
                "replication backlog_size must be at least {} bytes",
                MIN_BACKLOG_SIZE
            ));
        }
        if self.replication_tuning.repl_timeout.is_zero()
            || self.replication_tuning.syncio_timeout.is_zero()
        {
            return Err(anyhow!("replication timeouts cannot be zero"));
        }
        if self.replication_tuning.ping_period.is_zero() {
            return Err(anyhow!("replication ping_period cannot be zero"));
        }

        match &self.replication {
            ReplicationConfig::Replica {
                primary_host,
                primary_port,
                ..
            } => {
                if *primary_port == 0 {
                    return Err(anyhow!("primary_port cannot be 0"));
                }
                if primary_host.trim().is_empty() {
                    return Err(anyhow!("primary_host cannot be empty"));
                }
            }
            ReplicationConfig::Primary(primary) => {
                if primary.min_replicas_to_write > 0 && primary.min_replicas_max_lag == 0 {
                    return Err(anyhow!(
                        "min_replicas_max_lag cannot be 0 when min_replicas_to_write is set"
                    ));
                }
            }
        }
        Ok(())
    }
}
