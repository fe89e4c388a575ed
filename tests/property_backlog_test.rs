// tests/property_backlog_test.rs

//! Property-based tests pitting the backlog ring against a flat reference
//! model: for any append sequence, every in-window offset serves exactly the
//! suffix of the full stream, and every out-of-window offset is refused.

use citrinedb::config::MIN_BACKLOG_SIZE;
use citrinedb::core::replication::backlog::{BacklogServeError, ReplicationBacklog};
use proptest::prelude::*;
use std::sync::atomic::AtomicU64;

fn chunk_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..3000), 1..24)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn backlog_serves_suffix_of_reference_stream(chunks in chunk_strategy(), probe in 0u64..40_000) {
        tokio_test::block_on(async move {
            let (backlog, _rx) = ReplicationBacklog::new();
            let offset = AtomicU64::new(0);
            backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

            let mut reference: Vec<u8> = Vec::new();
            for chunk in &chunks {
                reference.extend_from_slice(chunk);
                let new_count = backlog.append(chunk).await.expect("active");
                // The stream count equals the bump plus everything appended.
                prop_assert_eq!(new_count, 1 + reference.len() as u64);
            }

            let (oldest, newest) = backlog.span().await.expect("active");
            prop_assert_eq!(newest, 2 + reference.len() as u64);
            prop_assert_eq!(
                newest - oldest,
                (reference.len().min(MIN_BACKLOG_SIZE)) as u64
            );

            // Every valid offset serves exactly the corresponding suffix.
            for from in [oldest, (oldest + newest) / 2, newest] {
                let (first, second) = backlog.serve(from).await.expect("in range");
                let mut served = first.to_vec();
                if let Some(second) = second {
                    served.extend_from_slice(&second);
                }
                let skip = (from - 2) as usize;
                prop_assert_eq!(&served[..], &reference[skip..]);
            }

            // Probing outside the window must fail rather than serve garbage.
            let out_of_range = if probe % 2 == 0 {
                newest + 1 + probe
            } else if oldest > 2 {
                oldest - 1
            } else {
                newest + 1
            };
            let served_out_of_range = matches!(
                backlog.serve(out_of_range).await,
                Err(BacklogServeError::OutOfRange { .. })
            );
            prop_assert!(served_out_of_range);
            Ok(())
        })?;
    }

    #[test]
    fn resize_preserves_monotone_offsets(chunks in chunk_strategy(), new_capacity in (MIN_BACKLOG_SIZE..4 * MIN_BACKLOG_SIZE)) {
        tokio_test::block_on(async move {
            let (backlog, _rx) = ReplicationBacklog::new();
            let offset = AtomicU64::new(0);
            backlog.ensure_active(MIN_BACKLOG_SIZE, &offset).await;

            let mut total = 0u64;
            for chunk in &chunks {
                total += chunk.len() as u64;
                backlog.append(chunk).await.expect("active");
            }

            let (_, before) = backlog.span().await.expect("active");
            backlog.resize(new_capacity).await;
            let (oldest, after) = backlog.span().await.expect("active");

            prop_assert_eq!(before, after);
            prop_assert_eq!(oldest, after);
            prop_assert_eq!(after, 2 + total);
            Ok(())
        })?;
    }
}
