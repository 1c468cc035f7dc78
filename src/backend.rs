//! Key-value backend abstraction.
//!
//! The store talks to its backend through the [`VaultBackend`] trait so the
//! same vault logic runs against Redis in production and an in-memory map
//! in tests and embedded setups.
//!
//! | Implementation | Backing | Used for |
//! |----------------|---------|----------|
//! | [`RedisBackend`] | Redis via `REDIS_URL`, native key TTLs | production |
//! | [`MemoryBackend`] | mutexed map with expiry timestamps | tests, embedding |
//!
//! # TTL-shrink protocol
//!
//! The one mutation a live entry ever sees is the TTL shrink on first
//! retrieval. [`VaultBackend::shrink_ttl`] is a compare-and-set: the caller
//! passes back the exact payload it observed, and the shrink applies only
//! if the stored payload still matches. Entries are immutable and handles
//! are never reused, so payload equality is a sound conflict witness. A
//! shrink never lengthens a TTL — if the remaining lifetime is already
//! shorter than the requested one, it is left alone.
//!
//! On Redis the compare and the expire run inside a single server-side Lua
//! script, so no lock is held across the network and conflicting writers
//! are detected in one round trip.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Result, VaultError};

/// A value read from the backend, with its remaining lifetime.
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub payload: String,
    /// Remaining TTL; `None` when the backend reports no expiry.
    pub remaining: Option<Duration>,
}

/// Outcome of a compare-and-set TTL shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkOutcome {
    /// The TTL was shrunk (or was already at or below the target).
    Applied,
    /// The stored payload no longer matches the witness.
    Conflict,
    /// The key vanished between the read and the shrink.
    Missing,
}

/// Storage operations required by the vault store.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    /// Store `payload` under `key` with the given TTL.
    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;

    /// Read the value and remaining TTL for `key`, or `None` when the key
    /// is missing or expired.
    async fn read(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Atomically shrink the TTL of `key` to `ttl`, provided the stored
    /// payload still equals `witness`.
    async fn shrink_ttl(&self, key: &str, witness: &str, ttl: Duration) -> Result<ShrinkOutcome>;
}

// ============ In-memory backend ============

struct MemoryEntry {
    payload: String,
    expires_at: Instant,
}

/// In-process backend: a mutexed map with expiry timestamps.
///
/// Expiry is enforced lazily on read, which is all the vault needs — an
/// expired entry is indistinguishable from a deleted one.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries. Handy for asserting that a
    /// pipeline run wrote — or refused to write — to the vault.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("memory backend poisoned")
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VaultBackend for MemoryBackend {
    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("memory backend poisoned");
        entries.insert(
            key.to_string(),
            MemoryEntry {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<StoredValue>> {
        let mut entries = self.entries.lock().expect("memory backend poisoned");
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(StoredValue {
                payload: entry.payload.clone(),
                remaining: Some(entry.expires_at - now),
            })),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn shrink_ttl(&self, key: &str, witness: &str, ttl: Duration) -> Result<ShrinkOutcome> {
        let mut entries = self.entries.lock().expect("memory backend poisoned");
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at <= now => {
                entries.remove(key);
                Ok(ShrinkOutcome::Missing)
            }
            Some(entry) if entry.payload != witness => Ok(ShrinkOutcome::Conflict),
            Some(entry) => {
                let target = now + ttl;
                if target < entry.expires_at {
                    entry.expires_at = target;
                }
                Ok(ShrinkOutcome::Applied)
            }
            None => Ok(ShrinkOutcome::Missing),
        }
    }
}

// ============ Redis backend ============

/// Lua script for the atomic compare-and-shrink. Runs server-side so the
/// observe/validate/expire sequence cannot interleave with other clients.
const SHRINK_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then return 'missing' end
if cur ~= ARGV[1] then return 'conflict' end
local ttl = redis.call('TTL', KEYS[1])
if ttl == -1 or ttl > tonumber(ARGV[2]) then
  redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 'applied'
"#;

/// Redis-backed implementation. Entries live under `data-vault:<handle>`
/// with native key TTLs; reads pipeline `GET` + `TTL` in one round trip.
pub struct RedisBackend {
    client: redis::Client,
    shrink: redis::Script,
}

impl RedisBackend {
    /// Connect to the backend at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// `BackendError` when the URL cannot be parsed.
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| VaultError::BackendError(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            shrink: redis::Script::new(SHRINK_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| VaultError::BackendError(format!("redis connection failed: {e}")))
    }
}

#[async_trait]
impl VaultBackend for RedisBackend {
    async fn put(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut con = self.connection().await?;
        con.set_ex::<_, _, ()>(key, payload, ttl.as_secs())
            .await
            .map_err(|e| VaultError::BackendError(format!("redis SET failed: {e}")))
    }

    async fn read(&self, key: &str) -> Result<Option<StoredValue>> {
        let mut con = self.connection().await?;
        let (payload, ttl): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(key)
            .ttl(key)
            .query_async(&mut con)
            .await
            .map_err(|e| VaultError::BackendError(format!("redis GET failed: {e}")))?;

        Ok(payload.map(|payload| StoredValue {
            payload,
            remaining: (ttl >= 0).then(|| Duration::from_secs(ttl as u64)),
        }))
    }

    async fn shrink_ttl(&self, key: &str, witness: &str, ttl: Duration) -> Result<ShrinkOutcome> {
        let mut con = self.connection().await?;
        let verdict: String = self
            .shrink
            .key(key)
            .arg(witness)
            .arg(ttl.as_secs())
            .invoke_async(&mut con)
            .await
            .map_err(|e| VaultError::BackendError(format!("redis shrink failed: {e}")))?;

        match verdict.as_str() {
            "applied" => Ok(ShrinkOutcome::Applied),
            "conflict" => Ok(ShrinkOutcome::Conflict),
            "missing" => Ok(ShrinkOutcome::Missing),
            other => Err(VaultError::BackendError(format!(
                "unexpected shrink verdict: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_read_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .put("k", "payload", Duration::from_secs(60))
            .await
            .unwrap();
        let stored = backend.read("k").await.unwrap().unwrap();
        assert_eq!(stored.payload, "payload");
        assert!(stored.remaining.unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_memory_expiry_hides_entry() {
        let backend = MemoryBackend::new();
        backend.put("k", "v", Duration::ZERO).await.unwrap();
        assert!(backend.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shrink_applies_and_never_lengthens() {
        let backend = MemoryBackend::new();
        backend.put("k", "v", Duration::from_secs(600)).await.unwrap();
        let outcome = backend
            .shrink_ttl("k", "v", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, ShrinkOutcome::Applied);
        let remaining = backend.read("k").await.unwrap().unwrap().remaining.unwrap();
        assert!(remaining <= Duration::from_secs(30));

        // Shrinking to a longer TTL leaves the shorter one in place.
        let outcome = backend
            .shrink_ttl("k", "v", Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome, ShrinkOutcome::Applied);
        let remaining = backend.read("k").await.unwrap().unwrap().remaining.unwrap();
        assert!(remaining <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_shrink_detects_conflict_and_missing() {
        let backend = MemoryBackend::new();
        backend.put("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            backend
                .shrink_ttl("k", "other", Duration::from_secs(30))
                .await
                .unwrap(),
            ShrinkOutcome::Conflict
        );
        assert_eq!(
            backend
                .shrink_ttl("gone", "v", Duration::from_secs(30))
                .await
                .unwrap(),
            ShrinkOutcome::Missing
        );
    }
}
