// tests/unit_replconf_test.rs

use bytes::Bytes;
use citrinedb::core::commands::command_trait::ParseCommand;
use citrinedb::core::commands::generic::replconf::Replconf;
use citrinedb::core::protocol::RespFrame;

fn bulk(s: &'static str) -> RespFrame {
    RespFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

#[tokio::test]
async fn test_replconf_parse_no_args() {
    let err = Replconf::parse(&[]).unwrap_err();
    assert!(format!("{err:?}").contains("WrongArgumentCount"));
}

#[tokio::test]
async fn test_replconf_listening_port() {
    let cmd = Replconf::parse(&[bulk("listening-port"), bulk("6380")]).unwrap();
    assert_eq!(cmd.listening_port(), Some(6380));
    assert_eq!(cmd.ack_offset(), None);
    assert!(!cmd.is_getack());
}

#[tokio::test]
async fn test_replconf_listening_port_case_insensitive() {
    let cmd = Replconf::parse(&[bulk("LISTENING-PORT"), bulk("6380")]).unwrap();
    assert_eq!(cmd.listening_port(), Some(6380));
}

#[tokio::test]
async fn test_replconf_ack() {
    let cmd = Replconf::parse(&[bulk("ACK"), bulk("123456")]).unwrap();
    assert_eq!(cmd.ack_offset(), Some(123456));
    assert_eq!(cmd.listening_port(), None);
}

#[tokio::test]
async fn test_replconf_ack_with_garbage_offset() {
    let cmd = Replconf::parse(&[bulk("ACK"), bulk("not-a-number")]).unwrap();
    assert_eq!(cmd.ack_offset(), None);
}

#[tokio::test]
async fn test_replconf_getack() {
    let cmd = Replconf::parse(&[bulk("GETACK"), bulk("*")]).unwrap();
    assert!(cmd.is_getack());
}
