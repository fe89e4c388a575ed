// tests/unit_script_cache_test.rs

use citrinedb::core::replication::script_cache::ReplicatedScriptCache;
use citrinedb::core::scripting::ScriptRegistry;

#[tokio::test]
async fn test_insert_and_contains() {
    let cache = ReplicatedScriptCache::new();
    assert!(cache.is_empty().await);

    cache.insert("abc123").await;
    assert!(cache.contains("abc123").await);
    assert!(cache.contains("ABC123").await);
    assert!(!cache.contains("def456").await);
}

#[tokio::test]
async fn test_duplicate_insert_is_idempotent() {
    let cache = ReplicatedScriptCache::new();
    cache.insert("digest").await;
    cache.insert("digest").await;
    cache.insert("DIGEST").await;
    assert!(cache.contains("digest").await);
}

#[tokio::test]
async fn test_clear_forgets_everything() {
    let cache = ReplicatedScriptCache::new();
    cache.insert("one").await;
    cache.insert("two").await;
    cache.clear().await;
    assert!(cache.is_empty().await);
    assert!(!cache.contains("one").await);
}

#[tokio::test]
async fn test_fifo_eviction_beyond_capacity() {
    let cache = ReplicatedScriptCache::new();
    cache.insert("first").await;
    for i in 0..4096 {
        cache.insert(&format!("filler-{i}")).await;
    }
    // The oldest digest must have been evicted to make room.
    assert!(!cache.contains("first").await);
    assert!(cache.contains("filler-4095").await);
}

#[tokio::test]
async fn test_registry_digest_is_stable_sha1() {
    // Digest of the empty input is a well-known SHA-1 vector.
    assert_eq!(
        ScriptRegistry::digest(b""),
        "da39a3ee5e6b4b0d3255bfef95601890afd80709"
    );

    let registry = ScriptRegistry::new();
    let sha = registry.load(bytes::Bytes::from_static(b"return 1"));
    assert!(registry.exists(&sha));
    assert!(registry.exists(&sha.to_ascii_uppercase()));
    assert_eq!(
        registry.get(&sha).unwrap(),
        bytes::Bytes::from_static(b"return 1")
    );

    registry.flush();
    assert!(!registry.exists(&sha));
}
