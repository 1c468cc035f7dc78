//! The vault store: TTL-governed, ownership-and-token-authenticated
//! storage of typed tabular blobs.
//!
//! # Operations
//!
//! | Op | Contract |
//! |----|----------|
//! | [`VaultStore::put`] | Mint handle + token, compute the envelope, store with TTL `T` |
//! | [`VaultStore::get`] | Return rows iff owner and token match and the entry is live |
//! | [`VaultStore::get_with_metadata`] | As `get`, plus the cached envelope |
//! | [`VaultStore::validate_token`] | Token check without touching the TTL |
//! | [`VaultStore::should_offload`] | Threshold check on rows / bytes / estimated tokens |
//!
//! # Grace-period protocol
//!
//! The first successful retrieval atomically reduces the entry's remaining
//! lifetime to the grace period (unless it is already shorter). The read
//! path is observe → validate → compare-and-set; on a CAS conflict it
//! retries exactly once, and a second conflict surfaces as not-found —
//! bounding latency under pathological contention at the cost of a rare
//! false negative for an entry that may still exist.
//!
//! `get` and `get_with_metadata` never error on a miss: a missing,
//! expired, wrong-owner, or wrong-token entry is uniformly `Ok(None)` so
//! callers cannot probe for other principals' handles.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ShrinkOutcome, VaultBackend};
use crate::config::{OffloadConfig, TtlConfig};
use crate::error::{principal_tail, Result, VaultError};
use crate::metadata::build_envelope;
use crate::models::{entry_key, DataSource, MetadataEnvelope, Semantics, VaultEntry};

/// Provenance of a put: the tool arguments and the user query that led to
/// the tool call. Folded into the envelope's `dataSource`.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub tool_args: Value,
    pub user_query: Option<String>,
}

/// TTL-keyed storage of vault entries over a [`VaultBackend`].
pub struct VaultStore {
    backend: Arc<dyn VaultBackend>,
    offload: OffloadConfig,
    ttl: TtlConfig,
}

impl VaultStore {
    pub fn new(backend: Arc<dyn VaultBackend>, offload: OffloadConfig, ttl: TtlConfig) -> Self {
        Self {
            backend,
            offload,
            ttl,
        }
    }

    /// Store a row array and return the minted handle plus the envelope
    /// that replaces the data in the LLM's context.
    ///
    /// Each call mints a fresh `vault-<uuid>` handle and access token;
    /// handles are never reused. The envelope is computed once here and
    /// cached inside the entry so reads never recompute statistics.
    ///
    /// # Errors
    ///
    /// `ValidationError` when `rows` is empty; `BackendError` on store
    /// failure.
    pub async fn put(
        &self,
        rows: Vec<Value>,
        owner_id: &str,
        session_id: &str,
        source_tool: &str,
        provenance: Option<Provenance>,
        semantics: Option<Semantics>,
    ) -> Result<(String, MetadataEnvelope)> {
        if rows.is_empty() {
            return Err(VaultError::ValidationError(
                "vault put requires a non-empty row array".to_string(),
            ));
        }

        let handle_id = format!("vault-{}", Uuid::new_v4());
        let access_token = Uuid::new_v4().to_string();
        let provenance = provenance.unwrap_or_default();

        let data_source = DataSource {
            tool_name: source_tool.to_string(),
            tool_args: provenance.tool_args,
            user_query: provenance.user_query,
            timestamp: chrono::Utc::now(),
        };

        let metadata = build_envelope(
            &rows,
            &handle_id,
            &access_token,
            source_tool,
            data_source,
            semantics,
        );

        let entry = VaultEntry {
            full_data: rows,
            owner_id: owner_id.to_string(),
            session_id: session_id.to_string(),
            created_at: chrono::Utc::now(),
            access_token,
            metadata: metadata.clone(),
        };

        let payload = serde_json::to_string(&entry)?;
        self.backend
            .put(&entry_key(&handle_id), &payload, self.ttl.ttl())
            .await?;

        info!(
            handle = %handle_id,
            owner = %principal_tail(owner_id),
            rows = entry.full_data.len(),
            tool = source_tool,
            "stored vault entry"
        );

        Ok((handle_id, metadata))
    }

    /// Retrieve the stored rows for a handle.
    pub async fn get(
        &self,
        handle_id: &str,
        principal: &str,
        token: &str,
    ) -> Result<Option<Vec<Value>>> {
        Ok(self
            .authorized_read(handle_id, principal, token)
            .await?
            .map(|entry| entry.full_data))
    }

    /// Retrieve the stored rows plus the cached metadata envelope.
    pub async fn get_with_metadata(
        &self,
        handle_id: &str,
        principal: &str,
        token: &str,
    ) -> Result<Option<(Vec<Value>, MetadataEnvelope)>> {
        Ok(self
            .authorized_read(handle_id, principal, token)
            .await?
            .map(|entry| (entry.full_data, entry.metadata)))
    }

    /// Check a token against a handle without mutating the TTL.
    pub async fn validate_token(&self, handle_id: &str, token: &str) -> Result<bool> {
        let Some(stored) = self.backend.read(&entry_key(handle_id)).await? else {
            return Ok(false);
        };
        let entry: VaultEntry = serde_json::from_str(&stored.payload)
            .map_err(|e| VaultError::BackendError(format!("corrupt vault entry: {e}")))?;
        Ok(entry.access_token == token)
    }

    /// Decide whether a value should be offloaded: it must be an array,
    /// and cross at least one of the row, byte, or estimated-token
    /// thresholds. Token estimation is bytes ÷ 4.
    pub fn should_offload(&self, data: &Value) -> bool {
        let Some(items) = data.as_array() else {
            return false;
        };
        if items.len() > self.offload.max_inline_rows {
            return true;
        }
        let bytes = serde_json::to_string(data).map(|s| s.len()).unwrap_or(0);
        bytes > self.offload.max_inline_bytes || bytes / 4 > self.offload.max_inline_tokens
    }

    /// The shared read path: observe, validate ownership and token, then
    /// compare-and-set the TTL down to the grace period. Retries the CAS
    /// exactly once on conflict.
    async fn authorized_read(
        &self,
        handle_id: &str,
        principal: &str,
        token: &str,
    ) -> Result<Option<VaultEntry>> {
        let key = entry_key(handle_id);
        let grace = self.ttl.grace_period();

        for attempt in 0..2 {
            let Some(stored) = self.backend.read(&key).await? else {
                debug!(handle = %handle_id, "vault entry not found");
                return Ok(None);
            };

            let entry: VaultEntry = serde_json::from_str(&stored.payload)
                .map_err(|e| VaultError::BackendError(format!("corrupt vault entry: {e}")))?;

            if entry.owner_id != principal || entry.access_token != token {
                debug!(
                    handle = %handle_id,
                    principal = %principal_tail(principal),
                    "credentials did not match vault entry"
                );
                return Ok(None);
            }

            // Already inside the grace window: nothing to shrink.
            if stored.remaining.is_some_and(|r| r <= grace) {
                return Ok(Some(entry));
            }

            match self.backend.shrink_ttl(&key, &stored.payload, grace).await? {
                ShrinkOutcome::Applied => {
                    debug!(handle = %handle_id, "ttl shrunk to grace period");
                    return Ok(Some(entry));
                }
                ShrinkOutcome::Missing => return Ok(None),
                ShrinkOutcome::Conflict => {
                    warn!(handle = %handle_id, attempt, "ttl shrink conflict");
                    continue;
                }
            }
        }

        // Two conflicts in a row: the entry may exist, but bounding
        // latency wins over certainty here.
        Ok(None)
    }
}
