// tests/integration_primary_test.rs

//! Socket-level tests of the primary side of replication: full sync,
//! incremental resumption, backlog overrun, run-id mismatch, ack-driven WAIT,
//! and ack-timeout reaping.

mod common;

use bytes::Bytes;
use citrinedb::core::persistence::ctdb;
use citrinedb::core::protocol::RespFrame;
use citrinedb::core::storage::Db;
use common::{FakeReplica, TestClient, count_occurrences, launch_node, test_config, wait_for};
use std::sync::Arc;
use std::time::Duration;

fn parse_fullresync(line: &str) -> (String, u64) {
    let parts: Vec<&str> = line
        .strip_prefix("+FULLRESYNC")
        .expect("FULLRESYNC header")
        .split_whitespace()
        .collect();
    assert_eq!(parts.len(), 2, "malformed header: {line}");
    (parts[0].to_string(), parts[1].parse().expect("offset"))
}

async fn load_snapshot(payload: &[u8], databases: usize) -> Vec<Arc<Db>> {
    let dbs: Vec<Arc<Db>> = (0..databases).map(|_| Arc::new(Db::new())).collect();
    ctdb::load_from_bytes(&Bytes::copy_from_slice(payload), &dbs)
        .await
        .expect("valid snapshot");
    dbs
}

#[tokio::test]
async fn test_fresh_replica_full_sync_then_incremental_resume() {
    let node = launch_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    assert_eq!(
        client.cmd(&["SET", "a", "1"]).await,
        RespFrame::SimpleString("OK".into())
    );
    client.cmd(&["SET", "b", "2"]).await;

    // --- Full sync: PSYNC ? -1 against a fresh primary reports offset 1
    // (the backlog-creation bump).
    let mut replica = FakeReplica::connect(node.addr).await;
    let reply = replica.handshake("?", "-1").await;
    let (run_id, offset) = parse_fullresync(&reply);
    assert_eq!(run_id.len(), 40);
    assert_eq!(offset, 1);

    let payload = replica.read_snapshot().await;
    let dbs = load_snapshot(&payload, 2).await;
    assert_eq!(
        dbs[0].get(&Bytes::from_static(b"a")).unwrap().data,
        Bytes::from_static(b"1")
    );
    assert_eq!(
        dbs[0].get(&Bytes::from_static(b"b")).unwrap().data,
        Bytes::from_static(b"2")
    );

    // --- Live stream: new writes arrive as frames.
    for _ in 0..10 {
        client.cmd(&["INCR", "counter"]).await;
    }
    let streamed = replica
        .read_stream_until(b"INCR", 10, Duration::from_secs(5))
        .await;
    let processed = offset + streamed.len() as u64;
    drop(replica);

    // --- Writes while the link is down.
    for _ in 0..5 {
        client.cmd(&["INCR", "counter"]).await;
    }

    // --- Incremental resume: claim the first missing byte.
    let mut replica = FakeReplica::connect(node.addr).await;
    let reply = replica.handshake(&run_id, &(processed + 1).to_string()).await;
    assert_eq!(reply, "+CONTINUE");
    let missed = replica
        .read_stream_until(b"INCR", 5, Duration::from_secs(5))
        .await;
    assert_eq!(count_occurrences(&missed, b"INCR"), 5);
    // No snapshot, and nothing is served twice.
    assert_eq!(count_occurrences(&missed, b"CITRINE"), 0);
}

#[tokio::test]
async fn test_resume_with_wrong_run_id_forces_full_sync() {
    let node = launch_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;
    client.cmd(&["SET", "k", "v"]).await;

    let mut replica = FakeReplica::connect(node.addr).await;
    let stale_run_id = "0123456789abcdef0123456789abcdef01234567";
    let reply = replica.handshake(stale_run_id, "10").await;
    assert!(
        reply.starts_with("+FULLRESYNC"),
        "expected full resync, got: {reply}"
    );
    let payload = replica.read_snapshot().await;
    let dbs = load_snapshot(&payload, 2).await;
    assert!(dbs[0].get(&Bytes::from_static(b"k")).is_some());
}

#[tokio::test]
async fn test_resume_beyond_backlog_window_forces_full_sync() {
    let node = launch_node(test_config()).await;

    // Attach once so the backlog exists and learn the stream identity.
    let mut replica = FakeReplica::connect(node.addr).await;
    let reply = replica.handshake("?", "-1").await;
    let (run_id, _) = parse_fullresync(&reply);
    let _ = replica.read_snapshot().await;
    drop(replica);

    // An offset older than the retained window (the bump byte itself) can
    // only be answered with a full transfer.
    let mut replica = FakeReplica::connect(node.addr).await;
    let reply = replica.handshake(&run_id, "1").await;
    assert!(
        reply.starts_with("+FULLRESYNC"),
        "expected full resync, got: {reply}"
    );
}

#[tokio::test]
async fn test_wait_counts_acked_replicas() {
    let node = launch_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;

    let mut replica = FakeReplica::connect(node.addr).await;
    let reply = replica.handshake("?", "-1").await;
    let (_, offset) = parse_fullresync(&reply);
    let _ = replica.read_snapshot().await;

    client.cmd(&["SET", "x", "1"]).await;
    let streamed = replica
        .read_stream_until(b"SET", 1, Duration::from_secs(5))
        .await;
    replica.send_ack(offset + streamed.len() as u64).await;

    // The ack covers everything written so far, so WAIT returns promptly.
    let reply = client.cmd(&["WAIT", "1", "2000"]).await;
    assert_eq!(reply, RespFrame::Integer(1));
}

#[tokio::test]
async fn test_silent_replica_is_reaped_after_timeout() {
    let mut config = test_config();
    config.replication_tuning.repl_timeout = Duration::from_secs(2);
    let node = launch_node(config).await;

    let mut replica = FakeReplica::connect(node.addr).await;
    let _ = replica.handshake("?", "-1").await;
    let _ = replica.read_snapshot().await;

    let state = node.state.clone();
    wait_for(
        || !state.replica_states.is_empty(),
        Duration::from_secs(5),
        "replica registration",
    )
    .await;

    // No acks ever arrive; the cron must tear the session down shortly
    // after the timeout expires.
    wait_for(
        || state.replica_states.is_empty(),
        Duration::from_secs(10),
        "timed-out replica teardown",
    )
    .await;
}

#[tokio::test]
async fn test_two_replicas_share_one_snapshot_round() {
    let node = launch_node(test_config()).await;
    let mut client = TestClient::connect(node.addr).await;
    client.cmd(&["SET", "shared", "dataset"]).await;

    let (mut first, mut second) = tokio::join!(
        FakeReplica::connect(node.addr),
        FakeReplica::connect(node.addr)
    );
    let (reply_a, reply_b) =
        tokio::join!(first.handshake("?", "-1"), second.handshake("?", "-1"));
    let (_, offset_a) = parse_fullresync(&reply_a);
    let (_, offset_b) = parse_fullresync(&reply_b);

    let (payload_a, payload_b) = tokio::join!(first.read_snapshot(), second.read_snapshot());

    // Both sessions resolve to the same snapshot cut and converge on the
    // same dataset.
    assert_eq!(offset_a, offset_b);
    assert_eq!(payload_a, payload_b);
    let dbs = load_snapshot(&payload_a, 2).await;
    assert_eq!(
        dbs[0].get(&Bytes::from_static(b"shared")).unwrap().data,
        Bytes::from_static(b"dataset")
    );
}
