//! Metadata extraction: schema inference, column statistics, and envelope
//! assembly.
//!
//! Given a row array, this module derives everything the LLM sees in place
//! of the bulk data:
//!
//! 1. Columns come from the first row's keys, in first-row order.
//! 2. Each column's type is inferred from its first non-null value;
//!    `nullable` is set iff any row has a null or missing value.
//! 3. `unique` counts distinct JSON-serialized values (nulls excluded);
//!    when `unique ≤ 20`, up to five `topValues` are listed by descending
//!    frequency, ties broken by first occurrence.
//! 4. Numeric aggregates (`min`/`max`/`sum`/`avg`) cover the numeric
//!    subset only, and only when at least one value is numeric.
//! 5. `sampleRows` is the first `min(5, rowCount)` rows, verbatim.
//!
//! Empty input produces an envelope with empty schema and stats and a
//! distinct note telling the LLM there was no data to store.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{
    ColumnSchema, ColumnStats, ColumnType, DataSource, MetadataEnvelope, Semantics, TopValue,
};

/// Number of sample rows carried in the envelope.
pub const SAMPLE_ROWS: usize = 5;
/// `topValues` is only computed for columns with at most this many
/// distinct values.
const TOP_VALUES_UNIQUE_CAP: usize = 20;
/// Maximum entries in a `topValues` list.
const TOP_VALUES_LIMIT: usize = 5;

/// True for strings matching an ISO-8601 date or date-time.
pub fn is_iso_dateish(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
}

/// Infer the column type of a single value.
fn infer_type(value: &Value) -> ColumnType {
    match value {
        Value::Null => ColumnType::Null,
        Value::Bool(_) => ColumnType::Boolean,
        Value::Number(_) => ColumnType::Number,
        Value::String(s) => {
            if is_iso_dateish(s) {
                ColumnType::Date
            } else {
                ColumnType::String
            }
        }
        Value::Array(_) => ColumnType::Array,
        Value::Object(_) => ColumnType::Object,
    }
}

/// Column names from the first row, in key order. Empty for empty input
/// or a non-object first row.
fn column_names(rows: &[Value]) -> Vec<String> {
    rows.first()
        .and_then(|r| r.as_object())
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

/// Infer the schema of a row array.
///
/// The type of each column comes from its first non-null value across all
/// rows; a column that is null everywhere gets type `null`. `nullable` is
/// true iff any row holds null or lacks the key.
pub fn infer_schema(rows: &[Value]) -> Vec<ColumnSchema> {
    column_names(rows)
        .into_iter()
        .map(|column| {
            let mut column_type = ColumnType::Null;
            let mut nullable = false;
            for row in rows {
                match row.get(&column) {
                    None | Some(Value::Null) => nullable = true,
                    Some(v) => {
                        if column_type == ColumnType::Null {
                            column_type = infer_type(v);
                        }
                    }
                }
            }
            ColumnSchema {
                column,
                column_type,
                nullable,
            }
        })
        .collect()
}

/// Compute per-column statistics for a row array, in first-row key order.
pub fn compute_stats(rows: &[Value]) -> Vec<ColumnStats> {
    column_names(rows)
        .into_iter()
        .map(|column| column_stats(rows, &column))
        .collect()
}

fn column_stats(rows: &[Value], column: &str) -> ColumnStats {
    // Frequency of JSON-serialized values, with first-occurrence order
    // retained for tie-breaking.
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();
    let mut null_count = 0usize;
    let mut numeric: Vec<f64> = Vec::new();

    for row in rows {
        match row.get(column) {
            None | Some(Value::Null) => null_count += 1,
            Some(v) => {
                let key = v.to_string();
                let entry = counts.entry(key.clone()).or_insert(0);
                if *entry == 0 {
                    first_seen.push(key);
                }
                *entry += 1;
                if let Some(n) = v.as_f64() {
                    numeric.push(n);
                }
            }
        }
    }

    let unique = counts.len();

    let top_values = if unique > 0 && unique <= TOP_VALUES_UNIQUE_CAP {
        let mut ranked: Vec<(usize, String, usize)> = first_seen
            .iter()
            .enumerate()
            .map(|(order, key)| (order, key.clone(), counts[key]))
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
        Some(
            ranked
                .into_iter()
                .take(TOP_VALUES_LIMIT)
                .map(|(_, value, count)| TopValue { value, count })
                .collect(),
        )
    } else {
        None
    };

    let (min, max, sum, avg) = if numeric.is_empty() {
        (None, None, None, None)
    } else {
        let sum: f64 = numeric.iter().sum();
        let min = numeric.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (
            Some(min),
            Some(max),
            Some(sum),
            Some(sum / numeric.len() as f64),
        )
    };

    ColumnStats {
        column: column.to_string(),
        unique,
        top_values,
        min,
        max,
        sum,
        avg,
        null_count,
    }
}

/// Assemble the full metadata envelope for a row array.
///
/// The `_note` interpolates the handle and fetch token and tells the LLM
/// how to reach the data later; empty input yields a distinct no-data
/// note and empty schema/stats.
pub fn build_envelope(
    rows: &[Value],
    handle_id: &str,
    fetch_token: &str,
    source_tool: &str,
    data_source: DataSource,
    semantics: Option<Semantics>,
) -> MetadataEnvelope {
    let note = if rows.is_empty() {
        format!(
            "The '{source_tool}' tool returned no rows; nothing was stored in the data vault \
             and there is no data to query under handle {handle_id}."
        )
    } else {
        format!(
            "A large '{source_tool}' result ({} rows) was moved to the data vault instead of \
             this conversation. To aggregate it, call the vault query tool with handle \
             '{handle_id}', token '{fetch_token}', and a SQL statement using {{table}} as the \
             table name. To fetch rows, GET /data-vault/{handle_id} with the same credentials. \
             If the handle has expired, re-run '{source_tool}' for a fresh one.",
            rows.len()
        )
    };

    MetadataEnvelope {
        handle_id: handle_id.to_string(),
        fetch_token: fetch_token.to_string(),
        source_tool: source_tool.to_string(),
        schema: infer_schema(rows),
        row_count: rows.len(),
        sample_rows: rows.iter().take(SAMPLE_ROWS.min(rows.len())).cloned().collect(),
        column_stats: compute_stats(rows),
        data_source,
        semantics,
        offloaded: true,
        note,
    }
}
