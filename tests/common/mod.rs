// tests/common/mod.rs

//! Test helpers: an in-process server node, a RESP client, and a scripted
//! replica peer speaking the raw replication protocol.

#![allow(dead_code)]

use bytes::Bytes;
use citrinedb::config::Config;
use citrinedb::connection::ConnectionHandler;
use citrinedb::core::commands::ExecutionContext;
use citrinedb::core::protocol::{RespFrame, RespFrameCodec};
use citrinedb::core::replication;
use citrinedb::core::replication::cron::ReplicationCron;
use citrinedb::core::replication::propagator::Propagator;
use citrinedb::core::state::{ClientInfo, ClientRole, ServerState};
use citrinedb::core::storage::Db;
use citrinedb::core::{CitrineError, Command, RespValue};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// A minimal configuration for tests: two databases, no persistence.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.databases = 2;
    config.persistence.ctdb_enabled = false;
    config.persistence.aof_enabled = false;
    config
}

/// TestContext provides a complete test environment with a real state
/// instance, for exercising commands without sockets.
pub struct TestContext {
    pub state: Arc<ServerState>,
    pub db: Arc<Db>,
    pub db_index: usize,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let server_init =
            ServerState::initialize(config).expect("Failed to initialize server state");
        let state = server_init.state;
        let db = state.get_db(0).expect("Failed to get database 0");
        Self {
            state,
            db,
            db_index: 0,
        }
    }

    /// Executes a command and returns the response value.
    pub async fn execute(&self, command: Command) -> Result<RespValue, CitrineError> {
        let mut ctx = ExecutionContext {
            state: self.state.clone(),
            db: &self.db,
            db_index: self.db_index,
            session_id: 1,
        };
        let (resp, _outcome) = command.execute(&mut ctx).await?;
        Ok(resp)
    }
}

/// A running in-process server node with its background tasks.
pub struct TestNode {
    pub state: Arc<ServerState>,
    pub addr: SocketAddr,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Boots a full node (accept loop, propagator, cron, replication supervisor)
/// on an ephemeral port.
pub async fn launch_node(config: Config) -> TestNode {
    let server_init = ServerState::initialize(config).expect("Failed to initialize server state");
    let state = server_init.state.clone();
    let (shutdown_tx, _) = broadcast::channel(1);

    tokio::spawn(Propagator::new(state.clone()).run(shutdown_tx.subscribe()));
    tokio::spawn(ReplicationCron::new(state.clone()).run(shutdown_tx.subscribe()));
    tokio::spawn(replication::run_supervisor(
        state.clone(),
        shutdown_tx.subscribe(),
        server_init.replication_reconfigure_rx,
    ));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    state.config.lock().await.port = addr.port();

    let accept_state = state.clone();
    let accept_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut session_id: u64 = 0;
        loop {
            let Ok((socket, peer)) = listener.accept().await else {
                return;
            };
            session_id += 1;
            let (conn_tx, conn_rx) = broadcast::channel(1);
            let client_info = Arc::new(Mutex::new(ClientInfo {
                addr: peer,
                session_id,
                db_index: 0,
                role: ClientRole::Normal,
                created: Instant::now(),
                last_command_time: Instant::now(),
            }));
            accept_state
                .clients
                .insert(session_id, (client_info, conn_tx));

            let handler_state = accept_state.clone();
            let global_rx = accept_shutdown.subscribe();
            tokio::spawn(async move {
                let mut handler = ConnectionHandler::new(
                    socket,
                    peer,
                    handler_state,
                    session_id,
                    conn_rx,
                    global_rx,
                )
                .await;
                let _ = handler.run().await;
            });
        }
    });

    TestNode {
        state,
        addr,
        shutdown_tx,
    }
}

/// A framed RESP client for ordinary commands.
pub struct TestClient {
    framed: Framed<TcpStream, RespFrameCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("client connect");
        Self {
            framed: Framed::new(stream, RespFrameCodec),
        }
    }

    pub async fn cmd(&mut self, parts: &[&str]) -> RespFrame {
        self.framed
            .send(command_frame(parts))
            .await
            .expect("send command");
        timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("reply within deadline")
            .expect("connection open")
            .expect("valid frame")
    }
}

/// A scripted peer speaking the replica side of the replication protocol on
/// a raw socket (the snapshot payload is not RESP-framed).
pub struct FakeReplica {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl FakeReplica {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("replica connect");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    pub async fn send(&mut self, parts: &[&str]) {
        let bytes = command_frame(parts).encode_to_vec().expect("encode");
        self.writer.write_all(&bytes).await.expect("send");
    }

    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("line within deadline")
            .expect("read line");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// PING + REPLCONF + PSYNC; returns the PSYNC reply line.
    pub async fn handshake(&mut self, psync_id: &str, psync_offset: &str) -> String {
        self.send(&["PING"]).await;
        let pong = self.read_line().await;
        assert!(pong.starts_with('+'), "unexpected PING reply: {pong}");

        self.send(&["REPLCONF", "listening-port", "6399"]).await;
        let ok = self.read_line().await;
        assert!(ok.starts_with('+'), "unexpected REPLCONF reply: {ok}");

        self.send(&["PSYNC", psync_id, psync_offset]).await;
        self.read_line().await
    }

    /// Reads the `$<len>\r\n` preamble (skipping newline keepalives) and the
    /// payload that follows.
    pub async fn read_snapshot(&mut self) -> Vec<u8> {
        let size = loop {
            let line = self.read_line().await;
            if line.is_empty() {
                continue;
            }
            let len_str = line.strip_prefix('$').expect("snapshot preamble");
            break len_str.parse::<usize>().expect("snapshot length");
        };
        let mut payload = vec![0u8; size];
        timeout(
            Duration::from_secs(5),
            self.reader.read_exact(&mut payload),
        )
        .await
        .expect("snapshot within deadline")
        .expect("read snapshot");
        payload
    }

    /// Accumulates stream bytes until `needle` occurs `count` times or the
    /// deadline passes, then keeps draining until the stream goes quiet so
    /// the returned byte count ends on a frame boundary.
    pub async fn read_stream_until(
        &mut self,
        needle: &[u8],
        count: usize,
        deadline: Duration,
    ) -> Vec<u8> {
        let started = Instant::now();
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        while count_occurrences(&collected, needle) < count {
            assert!(
                started.elapsed() < deadline,
                "expected {count} occurrences of {:?}, got {} in {:?}",
                String::from_utf8_lossy(needle),
                count_occurrences(&collected, needle),
                String::from_utf8_lossy(&collected),
            );
            if let Ok(Ok(n)) =
                timeout(Duration::from_millis(100), self.reader.read(&mut buf)).await
            {
                assert!(n > 0, "stream closed early");
                collected.extend_from_slice(&buf[..n]);
            }
        }
        // Drain any trailing bytes already in flight.
        while let Ok(Ok(n)) =
            timeout(Duration::from_millis(200), self.reader.read(&mut buf)).await
        {
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        collected
    }

    pub async fn send_ack(&mut self, offset: u64) {
        self.send(&["REPLCONF", "ACK", &offset.to_string()]).await;
    }
}

pub fn command_frame(parts: &[&str]) -> RespFrame {
    RespFrame::Array(
        parts
            .iter()
            .map(|part| RespFrame::BulkString(Bytes::copy_from_slice(part.as_bytes())))
            .collect(),
    )
}

pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|w| w == &needle).count()
}

/// Polls a condition until it holds or the deadline passes.
pub async fn wait_for<F>(mut condition: F, deadline: Duration, what: &str)
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
