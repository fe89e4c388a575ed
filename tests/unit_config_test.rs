// tests/unit_config_test.rs

use citrinedb::config::{Config, MIN_BACKLOG_SIZE, ReplicationConfig};
use std::io::Write;

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.port, 7878);
    assert_eq!(config.databases, 16);
    assert!(!config.replication.is_replica());
    assert_eq!(config.replication_tuning.backlog_size, 1024 * 1024);
}

#[test]
fn test_replica_config_from_toml() {
    let toml_text = r#"
        port = 7879

        [replication]
        role = "replica"
        primary_host = "192.168.1.10"
        primary_port = 7878

        [replication_tuning]
        backlog_size = 2097152
        repl_timeout = "30s"
        ping_period = "5s"
    "#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml_text.as_bytes()).unwrap();

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.port, 7879);
    match &config.replication {
        ReplicationConfig::Replica {
            primary_host,
            primary_port,
            primary_auth,
        } => {
            assert_eq!(primary_host, "192.168.1.10");
            assert_eq!(*primary_port, 7878);
            assert!(primary_auth.is_none());
        }
        other => panic!("expected replica role, got {other:?}"),
    }
    assert_eq!(config.replication_tuning.backlog_size, 2 * 1024 * 1024);
    assert_eq!(
        config.replication_tuning.repl_timeout,
        std::time::Duration::from_secs(30)
    );
    assert_eq!(
        config.replication_tuning.ping_period,
        std::time::Duration::from_secs(5)
    );
}

#[test]
fn test_backlog_size_floor_is_enforced() {
    let mut config = Config::default();
    config.replication_tuning.backlog_size = MIN_BACKLOG_SIZE - 1;
    assert!(config.validate().is_err());

    config.replication_tuning.backlog_size = MIN_BACKLOG_SIZE;
    assert!(config.validate().is_ok());
}

#[test]
fn test_replica_target_must_be_sane() {
    let mut config = Config::default();
    config.replication = ReplicationConfig::Replica {
        primary_host: "".to_string(),
        primary_port: 7878,
        primary_auth: None,
    };
    assert!(config.validate().is_err());

    config.replication = ReplicationConfig::Replica {
        primary_host: "primary.example".to_string(),
        primary_port: 0,
        primary_auth: None,
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_timeouts_rejected() {
    let mut config = Config::default();
    config.replication_tuning.repl_timeout = std::time::Duration::ZERO;
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(Config::from_file("no-such-config.toml").is_err());
}
