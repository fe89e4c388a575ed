// tests/unit_expire_test.rs

mod common;

use bytes::Bytes;
use citrinedb::core::commands::generic::{Expire, PExpireAt, Persist, Ttl};
use citrinedb::core::storage::StoredValue;
use citrinedb::core::storage::data_types::now_ms;
use citrinedb::core::{Command, RespValue};
use common::TestContext;

fn key() -> Bytes {
    Bytes::from_static(b"k")
}

async fn seed(ctx: &TestContext) {
    ctx.db.set(key(), StoredValue::new(Bytes::from_static(b"v")));
}

#[tokio::test]
async fn test_expire_sets_ttl() {
    let ctx = TestContext::new().await;
    seed(&ctx).await;

    let reply = ctx
        .execute(Command::Expire(Expire {
            key: key(),
            seconds: 120,
        }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::Integer(1));

    let reply = ctx.execute(Command::Ttl(Ttl { key: key() })).await.unwrap();
    match reply {
        RespValue::Integer(secs) => assert!((1..=120).contains(&secs)),
        other => panic!("expected TTL, got {other:?}"),
    }
}

#[tokio::test]
async fn test_expire_missing_key() {
    let ctx = TestContext::new().await;
    let reply = ctx
        .execute(Command::Expire(Expire {
            key: key(),
            seconds: 10,
        }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::Integer(0));
}

#[tokio::test]
async fn test_pexpireat_in_the_past_deletes() {
    let ctx = TestContext::new().await;
    seed(&ctx).await;

    let reply = ctx
        .execute(Command::PExpireAt(PExpireAt {
            key: key(),
            at_ms: 1,
        }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::Integer(1));
    assert!(ctx.db.get(&key()).is_none());
}

#[tokio::test]
async fn test_pexpireat_in_the_future() {
    let ctx = TestContext::new().await;
    seed(&ctx).await;

    let deadline = now_ms() + 30_000;
    ctx.execute(Command::PExpireAt(PExpireAt {
        key: key(),
        at_ms: deadline,
    }))
    .await
    .unwrap();
    assert_eq!(ctx.db.get(&key()).unwrap().expires_at_ms, Some(deadline));
}

#[tokio::test]
async fn test_persist_clears_ttl() {
    let ctx = TestContext::new().await;
    ctx.db.set(
        key(),
        StoredValue::with_expiry(Bytes::from_static(b"v"), now_ms() + 60_000),
    );

    let reply = ctx
        .execute(Command::Persist(Persist { key: key() }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::Integer(1));
    assert_eq!(ctx.db.get(&key()).unwrap().expires_at_ms, None);

    // A second PERSIST has nothing left to clear.
    let reply = ctx
        .execute(Command::Persist(Persist { key: key() }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::Integer(0));
}

#[tokio::test]
async fn test_ttl_reports_missing_and_persistent_keys() {
    let ctx = TestContext::new().await;
    let reply = ctx.execute(Command::Ttl(Ttl { key: key() })).await.unwrap();
    assert_eq!(reply, RespValue::Integer(-2));

    seed(&ctx).await;
    let reply = ctx.execute(Command::Ttl(Ttl { key: key() })).await.unwrap();
    assert_eq!(reply, RespValue::Integer(-1));
}
