// tests/unit_role_test.rs

mod common;

use bytes::Bytes;
use citrinedb::config::ReplicationConfig;
use citrinedb::core::commands::generic::{Info, Role};
use citrinedb::core::{Command, RespValue};
use common::{TestContext, test_config};

#[tokio::test]
async fn test_role_primary_shape() {
    let ctx = TestContext::new().await;
    let reply = ctx.execute(Command::Role(Role)).await.unwrap();

    let RespValue::Array(mut parts) = reply else {
        panic!("expected array");
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(
        parts.remove(0),
        RespValue::BulkString(Bytes::from_static(b"master"))
    );
    assert!(matches!(parts.remove(0), RespValue::Integer(offset) if offset >= 0));
    assert!(matches!(parts.remove(0), RespValue::Array(replicas) if replicas.is_empty()));
}

#[tokio::test]
async fn test_role_replica_shape() {
    let mut config = test_config();
    config.replication = ReplicationConfig::Replica {
        primary_host: "10.1.2.3".to_string(),
        primary_port: 7878,
        primary_auth: None,
    };
    let ctx = TestContext::with_config(config).await;

    let reply = ctx.execute(Command::Role(Role)).await.unwrap();
    let RespValue::Array(mut parts) = reply else {
        panic!("expected array");
    };
    assert_eq!(parts.len(), 5);
    assert_eq!(
        parts.remove(0),
        RespValue::BulkString(Bytes::from_static(b"slave"))
    );
    assert_eq!(
        parts.remove(0),
        RespValue::BulkString(Bytes::from_static(b"10.1.2.3"))
    );
    assert_eq!(parts.remove(0), RespValue::Integer(7878));
    assert!(matches!(parts.remove(0), RespValue::BulkString(_)));
    assert_eq!(parts.remove(0), RespValue::Integer(0));
}

#[tokio::test]
async fn test_info_replication_section() {
    let ctx = TestContext::new().await;
    let reply = ctx
        .execute(Command::Info(Info {
            section: Some("replication".to_string()),
        }))
        .await
        .unwrap();

    let RespValue::BulkString(body) = reply else {
        panic!("expected bulk string");
    };
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("role:master"));
    assert!(text.contains("connected_slaves:0"));
    assert!(text.contains("master_repl_offset:0"));
    assert!(text.contains("repl_backlog_active:0"));
    let run_id = ctx.state.replication.run_id().await;
    assert!(text.contains(&format!("master_replid:{run_id}")));
    // Section filtering works.
    assert!(!text.contains("# Server"));
}
