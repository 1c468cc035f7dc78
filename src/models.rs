//! Core data types for the vault.
//!
//! These types flow through the offload and retrieval pipeline:
//!
//! ```text
//! tool result → OffloadPipeline → VaultEntry (stored) + MetadataEnvelope (to LLM)
//!                                       ↓
//!                              QueryEngine → QueryResult / FullDataResult
//! ```
//!
//! # Type Relationships
//!
//! - A **[`VaultEntry`]** is the stored record: the full row data plus
//!   ownership, session scope, and the cached envelope. It is serialized
//!   to JSON under `data-vault:<handleId>` and never exposed whole.
//! - A **[`MetadataEnvelope`]** replaces the bulk data in the LLM's
//!   context window: schema, stats, sample rows, provenance, semantics,
//!   and the handle/token pair needed for later retrieval.
//! - A **[`QueryResult`]** / **[`FullDataResult`]** is what the query
//!   engine returns to the LLM or a downstream visualization layer.
//!
//! All wire shapes serialize with camelCase field names; the two
//! LLM-facing markers keep their literal `_offloaded` / `_note` names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key prefix for all vault entries in the key-value backend.
pub const KEY_PREFIX: &str = "data-vault:";

/// A stored vault entry. Internal only — read paths return either the
/// row data, the envelope, or both, never the whole entry.
///
/// Entries are immutable after [`put`](crate::store::VaultStore::put);
/// the only state that changes over an entry's lifetime is its backend
/// TTL, and the only deletion is TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    /// Ordered row data. Always at least one row.
    pub full_data: Vec<Value>,
    /// Principal that caused the write. Required on all read paths.
    pub owner_id: String,
    /// Session scope of the write.
    pub session_id: String,
    /// Time of the write.
    pub created_at: DateTime<Utc>,
    /// Reusable credential bound 1:1 to the handle.
    pub access_token: String,
    /// Cached envelope so reads never recompute statistics.
    pub metadata: MetadataEnvelope,
}

/// The compact metadata object returned to the LLM in place of bulk data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEnvelope {
    /// Opaque entry address, `vault-<uuid>`.
    pub handle_id: String,
    /// Credential the LLM must echo on retrieval and query calls.
    pub fetch_token: String,
    /// Name of the tool that produced the data.
    pub source_tool: String,
    /// Ordered column descriptions, first-row key order.
    pub schema: Vec<ColumnSchema>,
    /// Total rows stored (not sampled).
    pub row_count: usize,
    /// First `min(5, rowCount)` rows, verbatim.
    pub sample_rows: Vec<Value>,
    /// Per-column statistics, schema order.
    pub column_stats: Vec<ColumnStats>,
    /// Provenance of the stored data.
    pub data_source: DataSource,
    /// Semantic classification from the analysis agent, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantics: Option<Semantics>,
    /// Disambiguator for the tool wrapper: `true` on every envelope.
    #[serde(rename = "_offloaded")]
    pub offloaded: bool,
    /// Human-readable instruction for the LLM, with the handle and token
    /// interpolated.
    #[serde(rename = "_note")]
    pub note: String,
}

/// One column of the inferred schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Inferred value type of a column, from the first non-null value.
///
/// `Date` covers strings matching ISO-8601 dates or date-times; it is a
/// secondary tag — the underlying value is still a JSON string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Null,
}

/// Per-column statistics computed at store time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStats {
    /// Column name (schema order).
    pub column: String,
    /// Cardinality of JSON-serialized values, nulls excluded.
    pub unique: usize,
    /// Up to five most frequent values, descending by count; only
    /// populated when `unique <= 20`. Keys are JSON-stringified, so
    /// string values appear quoted and object values get stable but
    /// opaque labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<TopValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    /// Rows with a null or missing value for this column.
    pub null_count: usize,
}

/// One entry of a column's `topValues` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopValue {
    /// JSON-stringified value.
    pub value: String,
    pub count: usize,
}

/// Provenance of a vault entry: which tool call produced it, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub tool_name: String,
    pub tool_args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_query: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Semantic classification of a dataset, produced by the analysis agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Semantics {
    /// One-paragraph description of what the data represents.
    pub description: String,
    pub data_type: DataKind,
    pub suggested_visualizations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_rationale: Option<String>,
    pub quality_insights: Vec<String>,
    /// Free-form extra metadata from the agent.
    pub enhancements: Value,
}

/// Coarse shape classification of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Timeseries,
    Tabular,
    Hierarchical,
    Geospatial,
    Text,
    #[default]
    Mixed,
}

/// Result of a SQL query over a vaulted handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub row_count: usize,
    /// Column names from the first result row; empty when no rows.
    pub columns: Vec<String>,
    pub execution_time_ms: u64,
    /// True iff the result hit the row cap.
    pub truncated: bool,
}

/// Result of a full-data retrieval (SQL bypass).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullDataResult {
    pub rows: Vec<Value>,
    pub row_count: usize,
    /// True iff a `limit` was supplied and trimmed the rows.
    pub limit_applied: bool,
    /// Serialized size of the returned rows.
    pub size_bytes: usize,
    /// `ceil(size_bytes / 4)`.
    pub estimated_tokens: usize,
}

/// Compute the backend key for a handle.
pub fn entry_key(handle_id: &str) -> String {
    format!("{KEY_PREFIX}{handle_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_prefix() {
        assert_eq!(entry_key("vault-123"), "data-vault:vault-123");
    }

    #[test]
    fn test_envelope_wire_names() {
        let env = MetadataEnvelope {
            handle_id: "vault-1".into(),
            fetch_token: "tok".into(),
            source_tool: "search".into(),
            schema: vec![ColumnSchema {
                column: "id".into(),
                column_type: ColumnType::Number,
                nullable: false,
            }],
            row_count: 1,
            sample_rows: vec![serde_json::json!({"id": 1})],
            column_stats: vec![],
            data_source: DataSource {
                tool_name: "search".into(),
                tool_args: Value::Null,
                user_query: None,
                timestamp: Utc::now(),
            },
            semantics: None,
            offloaded: true,
            note: "n".into(),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["handleId"], "vault-1");
        assert_eq!(v["fetchToken"], "tok");
        assert_eq!(v["rowCount"], 1);
        assert_eq!(v["schema"][0]["type"], "number");
        assert_eq!(v["_offloaded"], true);
        assert!(v.get("semantics").is_none());
    }

    #[test]
    fn test_data_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(DataKind::Timeseries).unwrap(),
            "timeseries"
        );
        let k: DataKind = serde_json::from_value(serde_json::json!("geospatial")).unwrap();
        assert_eq!(k, DataKind::Geospatial);
    }
}
