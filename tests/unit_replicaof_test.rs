// tests/unit_replicaof_test.rs

use bytes::Bytes;
use citrinedb::core::commands::command_trait::ParseCommand;
use citrinedb::core::commands::generic::replicaof::ReplicaOf;
use citrinedb::core::protocol::RespFrame;

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

#[tokio::test]
async fn test_replicaof_parse_host_port() {
    let cmd = ReplicaOf::parse(&[bulk("10.0.0.5"), bulk("7878")]).unwrap();
    assert_eq!(cmd.target, Some(("10.0.0.5".to_string(), 7878)));
}

#[tokio::test]
async fn test_replicaof_parse_no_one() {
    let cmd = ReplicaOf::parse(&[bulk("NO"), bulk("ONE")]).unwrap();
    assert_eq!(cmd.target, None);
}

#[tokio::test]
async fn test_replicaof_parse_no_one_mixed_case() {
    let cmd = ReplicaOf::parse(&[bulk("no"), bulk("one")]).unwrap();
    assert_eq!(cmd.target, None);
}

#[tokio::test]
async fn test_replicaof_parse_invalid_port() {
    assert!(ReplicaOf::parse(&[bulk("host"), bulk("notaport")]).is_err());
    assert!(ReplicaOf::parse(&[bulk("host"), bulk("0")]).is_err());
}

#[tokio::test]
async fn test_replicaof_parse_wrong_arity() {
    let err = ReplicaOf::parse(&[bulk("host")]).unwrap_err();
    assert!(format!("{err:?}").contains("WrongArgumentCount"));
}
