// tests/unit_backlog_test.rs

//! Unit tests for the replication backlog ring: offset accounting, the
//! creation bump, wrap-around serving, and resizing.

use citrinedb::config::MIN_BACKLOG_SIZE;
use citrinedb::core::replication::backlog::{BacklogServeError, ReplicationBacklog};
use std::sync::atomic::{AtomicU64, Ordering};

#[tokio::test]
async fn test_creation_bumps_offset_by_one() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);

    assert!(!backlog.is_active().await);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;
    assert!(backlog.is_active().await);

    // The bump consumes one virtual byte; the first real byte will be #2.
    assert_eq!(offset.load(Ordering::SeqCst), 1);
    assert_eq!(backlog.span().await, Some((2, 2)));

    // A second activation is a no-op.
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;
    assert_eq!(offset.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_append_advances_count_and_serves_back() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

    let data = b"*1\r\n$4\r\nPING\r\n";
    let new_count = backlog.append(data).await.expect("backlog active");
    assert_eq!(new_count, 1 + data.len() as u64);

    let (oldest, newest) = backlog.span().await.expect("active");
    assert_eq!(oldest, 2);
    assert_eq!(newest, 2 + data.len() as u64);
    // oldest + valid = stream offset.
    assert_eq!(oldest + data.len() as u64, newest);

    // Serving from the very first retained byte yields everything.
    let (first, second) = backlog.serve(oldest).await.expect("in range");
    assert!(second.is_none());
    assert_eq!(&first[..], data);

    // Serving from the end yields nothing; one past the end is invalid.
    let (empty, none) = backlog.serve(newest).await.expect("end is valid");
    assert!(empty.is_empty() && none.is_none());
    assert!(matches!(
        backlog.serve(newest + 1).await,
        Err(BacklogServeError::OutOfRange { .. })
    ));
}

#[tokio::test]
async fn test_serve_last_appended_chunk() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

    backlog.append(b"first-batch").await.expect("active");
    let chunk = b"second-batch";
    backlog.append(chunk).await.expect("active");

    let (_, newest) = backlog.span().await.expect("active");
    let (first, second) = backlog
        .serve(newest - chunk.len() as u64)
        .await
        .expect("in range");
    assert!(second.is_none());
    assert_eq!(&first[..], chunk);
}

#[tokio::test]
async fn test_overrun_evicts_oldest_and_wraps() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

    // Write three chunks whose total exceeds the capacity, forcing the ring
    // to overwrite its oldest bytes in place.
    let mut reference = Vec::new();
    for round in 0u8..3 {
        let chunk = vec![round + 1; 7 * 1024];
        reference.extend_from_slice(&chunk);
        backlog.append(&chunk).await.expect("active");
    }

    let (oldest, newest) = backlog.span().await.expect("active");
    assert_eq!(newest, 2 + reference.len() as u64);
    assert_eq!(newest - oldest, MIN_BACKLOG_SIZE as u64);

    // A claim older than the window must be refused (it would serve garbage).
    assert!(matches!(
        backlog.serve(oldest - 1).await,
        Err(BacklogServeError::OutOfRange { .. })
    ));

    // The retained window equals the tail of everything ever appended. The
    // read may wrap, producing two chunks.
    let (first, second) = backlog.serve(oldest).await.expect("in range");
    let mut served = first.to_vec();
    if let Some(second) = second {
        served.extend_from_slice(&second);
    }
    assert_eq!(&served[..], &reference[reference.len() - MIN_BACKLOG_SIZE..]);
}

#[tokio::test]
async fn test_append_larger_than_capacity_keeps_tail() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

    let huge: Vec<u8> = (0..MIN_BACKLOG_SIZE + 100).map(|i| i as u8).collect();
    let new_count = backlog.append(&huge).await.expect("active");
    assert_eq!(new_count, 1 + huge.len() as u64);

    let (oldest, newest) = backlog.span().await.expect("active");
    assert_eq!(newest - oldest, MIN_BACKLOG_SIZE as u64);
    let (first, second) = backlog.serve(oldest).await.expect("in range");
    let mut served = first.to_vec();
    if let Some(second) = second {
        served.extend_from_slice(&second);
    }
    assert_eq!(&served[..], &huge[huge.len() - MIN_BACKLOG_SIZE..]);
}

#[tokio::test]
async fn test_resize_discards_contents_but_preserves_offset() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

    backlog.append(b"soon to be discarded").await.expect("active");
    let (_, newest_before) = backlog.span().await.expect("active");

    backlog.resize(MIN_BACKLOG_SIZE * 2).await;
    let (oldest, newest) = backlog.span().await.expect("active");
    assert_eq!(newest, newest_before);
    assert_eq!(oldest, newest);

    // Future offsets remain monotone across the resize.
    let new_count = backlog.append(b"fresh data").await.expect("active");
    assert_eq!(new_count + 1, newest_before + b"fresh data".len() as u64);
}

#[tokio::test]
async fn test_inactive_backlog_accepts_nothing() {
    let (backlog, _rx) = ReplicationBacklog::new();
    assert!(backlog.append(b"data").await.is_none());
    assert!(matches!(
        backlog.serve(0).await,
        Err(BacklogServeError::Inactive)
    ));
    assert!(backlog.span().await.is_none());
}

#[tokio::test]
async fn test_deactivate_releases_ring() {
    let (backlog, _rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;
    backlog.append(b"payload").await.expect("active");

    backlog.deactivate().await;
    assert!(!backlog.is_active().await);

    // A new incarnation bumps again, so a stale peer whose offset matched
    // the previous ring's end cannot silently resume.
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;
    let (oldest, newest) = backlog.span().await.expect("active");
    assert_eq!(oldest, newest);
    assert_eq!(offset.load(Ordering::SeqCst) + 1, newest);
}

#[tokio::test]
async fn test_offset_watch_notifies_on_append() {
    let (backlog, mut rx) = ReplicationBacklog::new();
    let offset = AtomicU64::new(0);
    backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;
    let _ = rx.borrow_and_update();

    backlog.append(b"wake the streamers").await.expect("active");
    rx.changed().await.expect("sender alive");
    let (_, newest) = backlog.span().await.expect("active");
    assert_eq!(*rx.borrow(), newest);
}
