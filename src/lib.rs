//! # Data Vault
//!
//! **A side-channel cache and query layer for LLM tool results.**
//!
//! Large tool-call responses never belong in a model's context window.
//! The data vault intercepts them, moves the bulk rows into a TTL'd
//! key-value store, and hands the LLM a compact, semantically enriched
//! metadata envelope instead. The model (or a downstream visualization
//! layer) can later aggregate the stored data with SQL or fetch it whole
//! by handle — without the data ever round-tripping through the prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌───────────┐
//! │ tool result│──▶│OffloadPipeline │──▶│   Redis    │
//! │ (upstream) │   │sample→analyze  │   │ TTL'd KV   │
//! └────────────┘   │→extract→store  │   └────┬──────┘
//!                  └──────┬────────┘        │
//!                         ▼                 ▼
//!                 metadata envelope   ┌──────────┐   ┌──────────┐
//!                 (into LLM context)  │QueryEngine│   │   HTTP    │
//!                                     │ (DuckDB) │   │ retrieval │
//!                                     └──────────┘   └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. Upstream completes a tool call and hands the raw result to the
//!    **[`pipeline`]**, which normalizes it (string re-parse, wrapper
//!    unwrap).
//! 2. The **[`sample`]** module cuts strategic slices of the payload and
//!    the **[`analysis`]** agent — an external LLM — declares which dot
//!    paths hold bulk data and which must stay inline.
//! 3. **[`paths`]** splits the payload; each extracted array goes through
//!    **[`store`]**`::put`, which mints a `vault-<uuid>` handle plus an
//!    access token and computes the **[`metadata`]** envelope.
//! 4. The envelope (schema, stats, sample rows, provenance, semantics,
//!    `_note`) is merged with the inline residual and returned to the LLM.
//! 5. Later, the LLM runs SQL over a handle via the **[`query`]** engine,
//!    or a UI fetches the rows over the **[`server`]** HTTP API.
//!
//! ## Lifetime Protocol
//!
//! Entries live for a configurable TTL (default 30 minutes). The first
//! successful retrieval atomically shrinks the remaining lifetime to a
//! grace period (default 5 minutes) via an optimistic compare-and-set,
//! so data is collected soon after its consumer has seen it. Reads
//! require handle + owner + token; any mismatch is indistinguishable
//! from a missing handle.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-driven configuration with startup validation |
//! | [`error`] | The five error kinds and logging redaction helpers |
//! | [`models`] | Core data types: `VaultEntry`, `MetadataEnvelope`, query results |
//! | [`paths`] | Dot-path get/set/delete/extract over JSON trees |
//! | [`sample`] | Strategic payload sampling for the analysis prompt |
//! | [`metadata`] | Schema inference, column statistics, envelope assembly |
//! | [`analysis`] | Analysis agent trait, LLM client, lenient reply parsing |
//! | [`backend`] | Key-value backend trait: Redis and in-memory implementations |
//! | [`store`] | The vault store: put/get/validate, atomic TTL shrink |
//! | [`pipeline`] | Tool-response interception end to end |
//! | [`query`] | Embedded DuckDB SQL over vaulted handles |
//! | [`server`] | HTTP retrieval API (`GET /data-vault/{handle_id}`) |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use data_vault::backend::MemoryBackend;
//! use data_vault::config::{OffloadConfig, TtlConfig};
//! use data_vault::pipeline::OffloadPipeline;
//! use data_vault::store::VaultStore;
//!
//! # async fn example() -> Result<(), data_vault::error::VaultError> {
//! let store = Arc::new(VaultStore::new(
//!     Arc::new(MemoryBackend::new()),
//!     OffloadConfig::default(),
//!     TtlConfig::default(),
//! ));
//! // No analyst configured: the pipeline passes results through.
//! let pipeline = OffloadPipeline::new(store.clone(), None);
//! let out = pipeline
//!     .process(
//!         "did:user:alice",
//!         "session-1",
//!         "search",
//!         &serde_json::json!({"q": "rust"}),
//!         None,
//!         serde_json::json!([{"a": 1}]),
//!     )
//!     .await?;
//! assert_eq!(out, r#"[{"a":1}]"#);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod metadata;
pub mod models;
pub mod paths;
pub mod pipeline;
pub mod query;
pub mod sample;
pub mod server;
pub mod store;
