// tests/integration_replica_test.rs

//! Socket-level tests of the replica side of replication: the worker is
//! driven against a scripted primary that replies with canned handshake
//! lines, a snapshot, and stream frames.

mod common;

use bytes::Bytes;
use citrinedb::config::ReplicationConfig;
use citrinedb::core::Command;
use citrinedb::core::commands::generic::Select;
use citrinedb::core::commands::string::Set;
use citrinedb::core::persistence::ctdb;
use citrinedb::core::protocol::{RespFrame, RespFrameCodec};
use citrinedb::core::state::PrimaryLinkState;
use citrinedb::core::storage::{Db, StoredValue};
use common::{TestNode, launch_node, test_config, wait_for};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

const RUN_ID: &str = "9f8b2c1d0e3a4b5c6d7e8f90a1b2c3d4e5f60718";

struct ScriptedPrimary {
    framed: Framed<TcpStream, RespFrameCodec>,
}

impl ScriptedPrimary {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(Duration::from_secs(10), listener.accept())
            .await
            .expect("replica connects in time")
            .expect("accept");
        Self {
            framed: Framed::new(stream, RespFrameCodec),
        }
    }

    /// Reads the next command frame and asserts its name.
    async fn expect_command(&mut self, name: &str) -> Vec<Bytes> {
        let frame = timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("command within deadline")
            .expect("connection open")
            .expect("valid frame");
        let RespFrame::Array(parts) = frame else {
            panic!("expected a command array, got {frame:?}");
        };
        let mut args: Vec<Bytes> = parts
            .into_iter()
            .map(|part| match part {
                RespFrame::BulkString(b) => b,
                other => panic!("expected bulk string, got {other:?}"),
            })
            .collect();
        let got = String::from_utf8_lossy(&args.remove(0)).to_ascii_uppercase();
        assert_eq!(got, name.to_ascii_uppercase(), "unexpected command");
        args
    }

    async fn reply(&mut self, line: RespFrame) {
        self.framed.send(line).await.expect("send reply");
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.framed
            .get_mut()
            .write_all(bytes)
            .await
            .expect("send raw");
    }

    /// Drives PING and REPLCONF, then returns the PSYNC arguments.
    async fn handshake(&mut self) -> (String, String) {
        self.expect_command("PING").await;
        self.reply(RespFrame::SimpleString("PONG".into())).await;

        self.expect_command("REPLCONF").await;
        self.reply(RespFrame::SimpleString("OK".into())).await;

        let args = self.expect_command("PSYNC").await;
        assert_eq!(args.len(), 2);
        (
            String::from_utf8_lossy(&args[0]).to_string(),
            String::from_utf8_lossy(&args[1]).to_string(),
        )
    }

    async fn send_snapshot(&mut self, payload: &[u8]) {
        self.send_raw(format!("${}\r\n", payload.len()).as_bytes())
            .await;
        self.send_raw(payload).await;
    }

    /// Waits for a `REPLCONF ACK` at or beyond the given offset.
    async fn expect_ack_at_least(&mut self, expected: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no ack covering offset {expected}"
            );
            let args = self.expect_command("REPLCONF").await;
            assert!(String::from_utf8_lossy(&args[0]).eq_ignore_ascii_case("ACK"));
            let offset: u64 = String::from_utf8_lossy(&args[1]).parse().expect("offset");
            if offset >= expected {
                return;
            }
        }
    }
}

fn snapshot_with(key: &'static [u8], value: &'static [u8]) -> Bytes {
    let dbs: Vec<Arc<Db>> = vec![Arc::new(Db::new())];
    dbs[0].set(
        Bytes::from_static(key),
        StoredValue::new(Bytes::from_static(value)),
    );
    ctdb::encode_image(&ctdb::collect_entries(&dbs))
}

fn stream_frames(commands: &[Command]) -> Vec<u8> {
    commands
        .iter()
        .flat_map(|command| {
            let frame: RespFrame = command.clone().into();
            frame.encode_to_vec().expect("encode")
        })
        .collect()
}

fn set_command(key: &'static [u8], value: &'static [u8]) -> Command {
    Command::Set(Set {
        key: Bytes::from_static(key),
        value: Bytes::from_static(value),
        ..Set::default()
    })
}

async fn launch_replica_node(primary_port: u16) -> (TestNode, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config();
    config.databases = 1;
    config.replication = ReplicationConfig::Replica {
        primary_host: "127.0.0.1".to_string(),
        primary_port,
        primary_auth: None,
    };
    config.persistence.ctdb_path = dir
        .path()
        .join("dump.ctdb")
        .to_string_lossy()
        .into_owned();
    (launch_node(config).await, dir)
}

async fn wait_for_link(node: &TestNode, wanted: PrimaryLinkState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if node.state.replication.get_link_state().await == wanted {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "link never reached {wanted:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_full_sync_then_stream_then_incremental_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let primary_port = listener.local_addr().expect("addr").port();
    let (node, _dir) = launch_replica_node(primary_port).await;

    // --- First connection: full resync.
    let mut primary = ScriptedPrimary::accept(&listener).await;
    let (claimed_id, claimed_offset) = primary.handshake().await;
    assert_eq!(claimed_id, "?");
    assert_eq!(claimed_offset, "-1");

    primary
        .reply(RespFrame::SimpleString(format!("FULLRESYNC {RUN_ID} 1")))
        .await;
    primary.send_snapshot(&snapshot_with(b"foo", b"bar")).await;

    let frames = stream_frames(&[
        Command::Select(Select { db_index: 0 }),
        set_command(b"extra", b"value"),
    ]);
    primary.send_raw(&frames).await;

    // The snapshot and the streamed write both land in the store.
    let state = node.state.clone();
    wait_for(
        || {
            state.dbs[0].get(&Bytes::from_static(b"foo")).is_some()
                && state.dbs[0].get(&Bytes::from_static(b"extra")).is_some()
        },
        Duration::from_secs(10),
        "replicated dataset",
    )
    .await;
    wait_for_link(&node, PrimaryLinkState::Connected).await;

    // Acks reflect fully processed bytes: snapshot base plus stream frames.
    let expected_offset = 1 + frames.len() as u64;
    primary.expect_ack_at_least(expected_offset).await;
    {
        let info = node.state.replication.primary_info.lock().await;
        let info = info.as_ref().expect("active primary");
        assert_eq!(info.run_id, RUN_ID);
        assert_eq!(info.processed_offset, expected_offset);
    }

    // --- Drop the link; the worker caches the session and reconnects with
    // an incremental claim for the first missing byte.
    drop(primary);
    let mut primary = ScriptedPrimary::accept(&listener).await;
    let (claimed_id, claimed_offset) = primary.handshake().await;
    assert_eq!(claimed_id, RUN_ID);
    assert_eq!(claimed_offset, (expected_offset + 1).to_string());

    primary.reply(RespFrame::SimpleString("CONTINUE".into())).await;
    let more = stream_frames(&[set_command(b"after-resume", b"yes")]);
    primary.send_raw(&more).await;

    let state = node.state.clone();
    wait_for(
        || state.dbs[0].get(&Bytes::from_static(b"after-resume")).is_some(),
        Duration::from_secs(10),
        "post-resume write",
    )
    .await;

    // The dataset survived the reconnect: no snapshot was reloaded.
    assert!(node.state.dbs[0].get(&Bytes::from_static(b"foo")).is_some());
    let info = node.state.replication.primary_info.lock().await;
    assert_eq!(
        info.as_ref().expect("active primary").processed_offset,
        expected_offset + more.len() as u64
    );
}

#[tokio::test]
async fn test_legacy_primary_falls_back_to_sync() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let primary_port = listener.local_addr().expect("addr").port();
    let (node, _dir) = launch_replica_node(primary_port).await;

    let mut primary = ScriptedPrimary::accept(&listener).await;
    let _ = primary.handshake().await;

    // Reject PSYNC like a pre-PSYNC server would.
    primary
        .reply(RespFrame::Error("ERR unknown command 'PSYNC'".into()))
        .await;
    primary.expect_command("SYNC").await;
    primary
        .send_snapshot(&snapshot_with(b"legacy", b"dataset"))
        .await;

    let state = node.state.clone();
    wait_for(
        || state.dbs[0].get(&Bytes::from_static(b"legacy")).is_some(),
        Duration::from_secs(10),
        "legacy snapshot load",
    )
    .await;
    wait_for_link(&node, PrimaryLinkState::Connected).await;

    // A legacy primary does not understand REPLCONF ACK; the worker must
    // stay silent.
    let quiet = timeout(Duration::from_millis(2500), primary.framed.next()).await;
    assert!(quiet.is_err(), "unexpected traffic to a legacy primary");
}

#[tokio::test]
async fn test_keepalive_newlines_before_preamble_are_tolerated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let primary_port = listener.local_addr().expect("addr").port();
    let (node, _dir) = launch_replica_node(primary_port).await;

    let mut primary = ScriptedPrimary::accept(&listener).await;
    let _ = primary.handshake().await;
    primary
        .reply(RespFrame::SimpleString(format!("FULLRESYNC {RUN_ID} 1")))
        .await;

    // The primary stalls before the preamble, emitting keepalive newlines.
    primary.send_raw(b"\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    primary.send_raw(b"\n").await;
    primary.send_snapshot(&snapshot_with(b"foo", b"bar")).await;

    let state = node.state.clone();
    wait_for(
        || state.dbs[0].get(&Bytes::from_static(b"foo")).is_some(),
        Duration::from_secs(10),
        "snapshot after keepalives",
    )
    .await;
}
