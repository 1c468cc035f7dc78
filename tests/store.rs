//! Vault store lifecycle: round-trips, credential checks, the grace-period
//! shrink, and the retry-once conflict policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use data_vault::backend::{MemoryBackend, ShrinkOutcome, StoredValue, VaultBackend};
use data_vault::config::{OffloadConfig, TtlConfig};
use data_vault::error::Result;
use data_vault::store::{Provenance, VaultStore};

/// Delegating backend that reports a CAS conflict for the first N shrink
/// attempts, then behaves normally. Models a concurrent mutation racing
/// the TTL shrink.
struct ConflictingBackend {
    inner: MemoryBackend,
    conflicts_left: AtomicUsize,
    shrink_calls: AtomicUsize,
}

impl ConflictingBackend {
    fn new(conflicts: usize) -> Self {
        Self {
            inner: MemoryBackend::new(),
            conflicts_left: AtomicUsize::new(conflicts),
            shrink_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VaultBackend for ConflictingBackend {
    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        self.inner.put(key, payload, ttl).await
    }

    async fn read(&self, key: &str) -> Result<Option<StoredValue>> {
        self.inner.read(key).await
    }

    async fn shrink_ttl(&self, key: &str, witness: &str, ttl: Duration) -> Result<ShrinkOutcome> {
        self.shrink_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(ShrinkOutcome::Conflict);
        }
        self.inner.shrink_ttl(key, witness, ttl).await
    }
}

fn store_with(backend: Arc<dyn VaultBackend>) -> VaultStore {
    VaultStore::new(backend, OffloadConfig::default(), TtlConfig::default())
}

#[tokio::test]
async fn test_roundtrip_preserves_row_order_and_content() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let rows: Vec<_> = (0..50)
        .map(|i| json!({"id": i, "label": format!("row-{i}")}))
        .collect();

    let (handle, envelope) = store
        .put(
            rows.clone(),
            "did:user:alice",
            "sess-1",
            "export",
            Some(Provenance {
                tool_args: json!({"format": "rows"}),
                user_query: Some("export everything".into()),
            }),
            None,
        )
        .await
        .unwrap();

    assert_eq!(envelope.row_count, 50);
    assert_eq!(envelope.data_source.tool_name, "export");
    assert_eq!(envelope.data_source.tool_args, json!({"format": "rows"}));

    let fetched = store
        .get(&handle, "did:user:alice", &envelope.fetch_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched, rows);

    // Byte-identical after re-serialization.
    assert_eq!(
        serde_json::to_string(&fetched).unwrap(),
        serde_json::to_string(&rows).unwrap()
    );
}

#[tokio::test]
async fn test_each_put_mints_a_fresh_handle() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let rows = vec![json!({"a": 1})];

    let (h1, e1) = store
        .put(rows.clone(), "o", "s", "t", None, None)
        .await
        .unwrap();
    let (h2, e2) = store.put(rows, "o", "s", "t", None, None).await.unwrap();

    assert_ne!(h1, h2);
    assert_ne!(e1.fetch_token, e2.fetch_token);
}

#[tokio::test]
async fn test_only_the_minted_pair_authorizes_retrieval() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let (handle, envelope) = store
        .put(vec![json!({"a": 1})], "did:user:alice", "s", "t", None, None)
        .await
        .unwrap();
    let token = envelope.fetch_token;

    assert!(store
        .get(&handle, "did:user:alice", &token)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .get(&handle, "did:user:mallory", &token)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get(&handle, "did:user:alice", "wrong-token")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_expired_entry_is_not_found() {
    let store = VaultStore::new(
        Arc::new(MemoryBackend::new()),
        OffloadConfig::default(),
        TtlConfig {
            ttl_seconds: 0,
            grace_period_seconds: 0,
        },
    );
    let (handle, envelope) = store
        .put(vec![json!({"a": 1})], "o", "s", "t", None, None)
        .await
        .unwrap();

    assert!(store
        .get(&handle, "o", &envelope.fetch_token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_single_shrink_conflict_is_retried() {
    let backend = Arc::new(ConflictingBackend::new(1));
    let store = store_with(backend.clone());
    let (handle, envelope) = store
        .put(vec![json!({"a": 1})], "o", "s", "t", None, None)
        .await
        .unwrap();

    // One conflict: the retry succeeds and the rows come back.
    let fetched = store.get(&handle, "o", &envelope.fetch_token).await.unwrap();
    assert!(fetched.is_some());
    assert_eq!(backend.shrink_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_shrink_conflict_surfaces_as_not_found() {
    let backend = Arc::new(ConflictingBackend::new(2));
    let store = store_with(backend.clone());
    let (handle, envelope) = store
        .put(vec![json!({"a": 1})], "o", "s", "t", None, None)
        .await
        .unwrap();

    let fetched = store.get(&handle, "o", &envelope.fetch_token).await.unwrap();
    assert!(fetched.is_none());
    // Exactly one retry: two shrink attempts, never a third.
    assert_eq!(backend.shrink_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_get_with_metadata_returns_cached_envelope() {
    let store = store_with(Arc::new(MemoryBackend::new()));
    let rows: Vec<_> = (0..7).map(|i| json!({"n": i})).collect();
    let (handle, envelope) = store
        .put(rows, "o", "s", "metrics", None, None)
        .await
        .unwrap();

    let (data, metadata) = store
        .get_with_metadata(&handle, "o", &envelope.fetch_token)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(data.len(), 7);
    assert_eq!(metadata.row_count, 7);
    assert_eq!(metadata.handle_id, handle);
    assert_eq!(metadata.source_tool, "metrics");
    assert_eq!(metadata.sample_rows.len(), 5);
}
