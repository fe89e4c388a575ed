// src/core/replication/backlog.rs

//! Implements the replication backlog, a crucial component for efficient replication.
//!
//! The backlog is a fixed-size, in-memory circular byte buffer holding the most
//! recent stretch of the replication stream, addressable by stream offset. Its
//! purpose is to allow replicas that disconnect and reconnect quickly (e.g., due
//! to a brief network partition) to perform a fast partial resynchronization by
//! replaying only the missed bytes, rather than undergoing a slow and costly
//! full resynchronization (which involves a full dataset snapshot).
//!
//! Because the propagator only ever appends whole, self-delimiting RESP frames,
//! any frame-aligned offset inside the retained window is a valid resumption
//! point: a replica reading forward from it can parse the stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

/// Why a `serve` request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BacklogServeError {
    /// No backlog is currently allocated (no replica has attached, or it was
    /// reclaimed after an idle period).
    #[error("replication backlog is not active")]
    Inactive,
    /// The requested offset is no longer (or not yet) covered by the ring.
    #[error("offset {requested} outside backlog window [{oldest}, {newest}]")]
    OutOfRange { requested: u64, oldest: u64, newest: u64 },
}

/// `ReplicationBacklog` owns the optional ring buffer plus a `watch` channel
/// that announces stream-offset advancement to every streaming session.
#[derive(Debug, Clone)]
pub struct ReplicationBacklog {
    inner: Arc<Mutex<Option<BacklogBuffer>>>,
    offset_notifier_tx: Arc<watch::Sender<u64>>,
}

impl ReplicationBacklog {
    /// Creates an inactive backlog and returns it along with a `watch::Receiver`
    /// that any task can clone to monitor replication offset advancement.
    pub fn new() -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0u64);
        (
            Self {
                inner: Arc::new(Mutex::new(None)),
                offset_notifier_tx: Arc::new(tx),
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.offset_notifier_tx.subscribe()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Allocates the ring if it does not exist yet.
    ///
    /// Creation bumps the global offset counter by one before the first byte
    /// is ever appended. A stale replica whose remembered offset equals the
    /// final offset of a previous backlog incarnation must not be able to
    /// resume against a fresh ring that happens to start at the same number.
    pub async fn ensure_active(&self, capacity: usize, offset_counter: &AtomicU64) {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return;
        }
        let bumped = offset_counter.fetch_add(1, Ordering::SeqCst) + 1;
        // The virtual bump byte is already "produced", so the first byte the
        // ring will ever store carries the next offset.
        *guard = Some(BacklogBuffer::new(capacity, bumped + 1));
        info!(
            "Replication backlog created: capacity {} bytes, stream offset {}.",
            capacity,
            bumped + 1
        );
        self.notify(bumped + 1);
    }

    /// Frees the ring. Subsequent partial resynchronization attempts will be
    /// answered with a full resync until a new ring is created.
    pub async fn deactivate(&self) {
        let mut guard = self.inner.lock().await;
        if guard.take().is_some() {
            info!("Replication backlog released.");
        }
    }

    /// Appends a stretch of already-encoded stream frames. Returns the new
    /// total byte count of the stream (the value `master_repl_offset` must
    /// take), or `None` when no backlog is active, in which case the stream
    /// offset must not advance either.
    pub async fn append(&self, data: &[u8]) -> Option<u64> {
        let mut guard = self.inner.lock().await;
        let buffer = guard.as_mut()?;
        buffer.append(data);
        let next = buffer.stream_offset;
        drop(guard);
        self.notify(next);
        Some(next - 1)
    }

    /// Returns the backlog bytes from `from_offset` to the end of the stream
    /// as at most two contiguous chunks (the ring may wrap once).
    pub async fn serve(
        &self,
        from_offset: u64,
    ) -> Result<(bytes::Bytes, Option<bytes::Bytes>), BacklogServeError> {
        let guard = self.inner.lock().await;
        let buffer = guard.as_ref().ok_or(BacklogServeError::Inactive)?;
        buffer.serve(from_offset)
    }

    /// The currently retained window as `(oldest_offset, stream_offset)`.
    pub async fn span(&self) -> Option<(u64, u64)> {
        let guard = self.inner.lock().await;
        guard
            .as_ref()
            .map(|buffer| (buffer.oldest_offset(), buffer.stream_offset))
    }

    /// Replaces the ring storage with a new capacity. Contents are discarded
    /// (forcing attached replicas onto a full resync path if they fall back),
    /// but the stream offset is preserved so future offsets remain monotone.
    pub async fn resize(&self, new_capacity: usize) {
        let mut guard = self.inner.lock().await;
        if let Some(buffer) = guard.as_mut() {
            buffer.resize(new_capacity);
            debug!("Replication backlog resized to {} bytes.", new_capacity);
        }
    }

    fn notify(&self, end_offset: u64) {
        self.offset_notifier_tx.send_if_modified(|current| {
            if *current < end_offset {
                *current = end_offset;
                true
            } else {
                false
            }
        });
    }
}

/// The ring storage itself.
///
/// Stream bytes are numbered from one; `stream_offset` is the number the
/// *next* produced byte will carry (most recently written byte + 1). The byte
/// numbered `o` is retained iff `oldest_offset <= o < stream_offset`, and
/// `oldest_offset + valid_bytes == stream_offset` at all times. A replica
/// claiming `processed + 1` therefore asks for exactly the first byte it is
/// missing, and a fully caught-up claim equals `stream_offset` (empty reply).
#[derive(Debug)]
struct BacklogBuffer {
    buf: Vec<u8>,
    write_index: usize,
    valid_bytes: usize,
    stream_offset: u64,
}

impl BacklogBuffer {
    fn new(capacity: usize, start_offset: u64) -> Self {
        Self {
            buf: vec![0u8; capacity],
            write_index: 0,
            valid_bytes: 0,
            stream_offset: start_offset,
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn oldest_offset(&self) -> u64 {
        self.stream_offset - self.valid_bytes as u64
    }

    /// Writes `data` at the current write index, wrapping at most once, and
    /// overwriting the oldest bytes in place when the ring is full.
    fn append(&mut self, data: &[u8]) {
        let capacity = self.capacity();
        let len = data.len();

        if len >= capacity {
            // Only the tail of the write survives; lay it down linearly.
            let tail = &data[len - capacity..];
            self.buf.copy_from_slice(tail);
            self.write_index = 0;
            self.valid_bytes = capacity;
        } else {
            let first = (capacity - self.write_index).min(len);
            self.buf[self.write_index..self.write_index + first].copy_from_slice(&data[..first]);
            if len > first {
                self.buf[..len - first].copy_from_slice(&data[first..]);
            }
            self.write_index = (self.write_index + len) % capacity;
            self.valid_bytes = (self.valid_bytes + len).min(capacity);
        }

        self.stream_offset += len as u64;
    }

    fn serve(
        &self,
        from_offset: u64,
    ) -> Result<(bytes::Bytes, Option<bytes::Bytes>), BacklogServeError> {
        let oldest = self.oldest_offset();
        if from_offset < oldest || from_offset > self.stream_offset {
            return Err(BacklogServeError::OutOfRange {
                requested: from_offset,
                oldest,
                newest: self.stream_offset,
            });
        }

        let wanted = (self.stream_offset - from_offset) as usize;
        if wanted == 0 {
            return Ok((bytes::Bytes::new(), None));
        }

        let capacity = self.capacity();
        let start = (self.write_index + capacity - wanted) % capacity;
        if start + wanted <= capacity {
            let chunk = bytes::Bytes::copy_from_slice(&self.buf[start..start + wanted]);
            Ok((chunk, None))
        } else {
            let first = bytes::Bytes::copy_from_slice(&self.buf[start..]);
            let second = bytes::Bytes::copy_from_slice(&self.buf[..wanted - (capacity - start)]);
            Ok((first, Some(second)))
        }
    }

    fn resize(&mut self, new_capacity: usize) {
        self.buf = vec![0u8; new_capacity];
        self.write_index = 0;
        self.valid_bytes = 0;
    }
}
