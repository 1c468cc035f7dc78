//! SQL query engine over vaulted data.
//!
//! Mounts a vault entry as a temporary table in an embedded in-memory
//! DuckDB instance, runs one user query against it, and tears the table
//! down — enabling token-cheap aggregation over data the LLM never sees
//! in full.
//!
//! ```text
//! handle ──▶ VaultStore.get ──▶ CREATE TABLE vault_... ──▶ user SQL
//!                                      │                      │
//!                                      └──── DROP TABLE ◀─────┘  (always)
//! ```
//!
//! # Contract
//!
//! - Ownership and token validation happens first, via the store; a miss
//!   of any kind is an indistinguishable [`DataNotFound`](crate::error::VaultError::DataNotFound).
//! - Column SQL types come from the first row: integer-valued numbers →
//!   `BIGINT`, other numbers → `DOUBLE`, booleans → `BOOLEAN`, ISO-dateish
//!   strings → `TIMESTAMP`, other strings → `VARCHAR`, nested values →
//!   their JSON serialization in a `VARCHAR`.
//! - The literal `{table}` placeholder in the user SQL is replaced with
//!   the per-handle temp table name; `LIMIT 10000` is appended when the
//!   query has no LIMIT of its own, and results are capped at 10000 rows
//!   regardless.
//! - Queries run on a blocking thread under a 30-second wall clock; the
//!   temp table is dropped in the same closure after the query, whatever
//!   its outcome, so no `vault_*` table outlives a call.
//!
//! The engine holds the process's single DuckDB connection behind a
//! mutex. Temp table names embed the handle, so concurrent queries over
//! distinct handles never collide; queries over the same handle simply
//! serialize on the connection.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use duckdb::Connection;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::QueryConfig;
use crate::error::{Result, VaultError};
use crate::metadata::is_iso_dateish;
use crate::models::{FullDataResult, QueryResult};
use crate::store::VaultStore;

/// A SQL query against a vaulted handle.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub handle: String,
    pub sql: String,
    pub principal: String,
    pub token: String,
}

/// Query engine bound to a vault store and one embedded connection.
pub struct QueryEngine {
    store: Arc<VaultStore>,
    conn: Arc<Mutex<Connection>>,
    config: QueryConfig,
}

impl QueryEngine {
    /// Open the embedded in-memory database.
    ///
    /// # Errors
    ///
    /// `BackendError` when DuckDB fails to initialize.
    pub fn new(store: Arc<VaultStore>, config: QueryConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VaultError::BackendError(format!("duckdb init failed: {e}")))?;
        Ok(Self {
            store,
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Execute one SQL query over the data behind a handle.
    ///
    /// # Errors
    ///
    /// - `DataNotFound` — unknown handle, expired entry, wrong owner, or
    ///   wrong token (indistinguishable by design).
    /// - `QueryError` — SQL compile/execute failure or timeout; carries
    ///   the first 80 chars of the query.
    pub async fn execute_query(&self, request: &QueryRequest) -> Result<QueryResult> {
        let rows = self
            .store
            .get(&request.handle, &request.principal, &request.token)
            .await?
            .ok_or_else(|| VaultError::not_found(&request.handle))?;

        let table = temp_table_name(&request.handle);
        let sql = prepare_sql(&request.sql, &table, self.config.max_result_rows);
        debug!(handle = %request.handle, table = %table, "executing vault query");

        let conn = Arc::clone(&self.conn);
        let max_rows = self.config.max_result_rows;
        let task =
            tokio::task::spawn_blocking(move || run_query(&conn, &table, &rows, &sql, max_rows));

        let outcome = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), task)
            .await
            .map_err(|_| {
                VaultError::query(
                    &request.handle,
                    &request.sql,
                    format!("query timed out after {}s", self.config.timeout_secs),
                )
            })?;

        let (result_rows, elapsed_ms) = outcome
            .map_err(|e| VaultError::query(&request.handle, &request.sql, format!("query task failed: {e}")))?
            .map_err(|msg| VaultError::query(&request.handle, &request.sql, msg))?;

        let columns = result_rows
            .first()
            .and_then(|r| r.as_object())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        let row_count = result_rows.len();

        info!(
            handle = %request.handle,
            rows = row_count,
            elapsed_ms,
            "vault query completed"
        );

        Ok(QueryResult {
            truncated: row_count >= self.config.max_result_rows,
            rows: result_rows,
            row_count,
            columns,
            execution_time_ms: elapsed_ms,
        })
    }

    /// Retrieve the full dataset behind a handle, bypassing SQL.
    ///
    /// # Errors
    ///
    /// `DataNotFound` on any store miss.
    pub async fn retrieve_full_data(
        &self,
        handle: &str,
        principal: &str,
        token: &str,
        limit: Option<usize>,
    ) -> Result<FullDataResult> {
        let mut rows = self
            .store
            .get(handle, principal, token)
            .await?
            .ok_or_else(|| VaultError::not_found(handle))?;

        let total = rows.len();
        let limit_applied = match limit {
            Some(l) if l < total => {
                rows.truncate(l);
                true
            }
            _ => false,
        };

        let size_bytes = serde_json::to_string(&rows)?.len();
        Ok(FullDataResult {
            row_count: rows.len(),
            rows,
            limit_applied,
            size_bytes,
            estimated_tokens: size_bytes.div_ceil(4),
        })
    }
}

/// Temp table name for a handle: `vault_` prefix, `-` → `_`, anything
/// outside `[A-Za-z0-9_]` dropped.
fn temp_table_name(handle: &str) -> String {
    let sanitized: String = handle
        .replace('-', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("vault_{sanitized}")
}

/// Substitute `{table}` and append the row cap when the user query has no
/// LIMIT of its own.
fn prepare_sql(user_sql: &str, table: &str, cap: usize) -> String {
    let substituted = user_sql.replace("{table}", table);
    if substituted.to_lowercase().contains("limit") {
        substituted
    } else {
        let trimmed = substituted.trim_end().trim_end_matches(';');
        format!("{trimmed} LIMIT {cap}")
    }
}

/// SQL column type for a first-row value.
fn sql_type_for(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "BIGINT"
            } else {
                "DOUBLE"
            }
        }
        Value::String(s) if is_iso_dateish(s) => "TIMESTAMP",
        Value::String(_) => "VARCHAR",
        // Nested values are stored as their JSON serialization; nulls
        // give no type signal.
        Value::Array(_) | Value::Object(_) | Value::Null => "VARCHAR",
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL literal for one cell. Missing keys and nulls become `NULL`;
/// strings and JSON-serialized nested values are safely quoted.
fn sql_literal(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::Bool(b)) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => quote_literal(s),
        Some(nested) => quote_literal(&nested.to_string()),
    }
}

/// The blocking half: create the temp table, insert the rows, run the
/// query, and drop the table no matter what happened.
fn run_query(
    conn: &Mutex<Connection>,
    table: &str,
    rows: &[Value],
    sql: &str,
    max_rows: usize,
) -> std::result::Result<(Vec<Value>, u64), String> {
    let conn = conn
        .lock()
        .map_err(|_| "query connection poisoned".to_string())?;

    let started = Instant::now();
    let result = load_and_select(&conn, table, rows, sql, max_rows);

    // Teardown runs on every path; a failed query must not leak a table.
    let _ = conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"));

    result.map(|rows| (rows, started.elapsed().as_millis() as u64))
}

fn load_and_select(
    conn: &Connection,
    table: &str,
    rows: &[Value],
    sql: &str,
    max_rows: usize,
) -> std::result::Result<Vec<Value>, String> {
    let first = rows
        .first()
        .and_then(|r| r.as_object())
        .ok_or_else(|| "stored rows are not records; nothing to mount as a table".to_string())?;
    if first.is_empty() {
        return Err("first stored row has no columns".to_string());
    }

    let column_names: Vec<String> = first.keys().cloned().collect();
    let column_defs: Vec<String> = first
        .iter()
        .map(|(name, value)| format!("{} {}", quote_ident(name), sql_type_for(value)))
        .collect();

    conn.execute_batch(&format!(
        "CREATE TABLE {table} ({})",
        column_defs.join(", ")
    ))
    .map_err(|e| format!("failed to create temp table: {e}"))?;

    // Batched literal inserts; values were JSON to begin with, so quoting
    // is the only escaping concern.
    for chunk in rows.chunks(500) {
        let tuples: Vec<String> = chunk
            .iter()
            .map(|row| {
                let cells: Vec<String> = column_names
                    .iter()
                    .map(|name| sql_literal(row.get(name)))
                    .collect();
                format!("({})", cells.join(", "))
            })
            .collect();
        conn.execute_batch(&format!(
            "INSERT INTO {table} VALUES {}",
            tuples.join(", ")
        ))
        .map_err(|e| format!("failed to load rows: {e}"))?;
    }

    let mut stmt = conn.prepare(sql).map_err(|e| format!("sql error: {e}"))?;
    let mut rows = stmt.query([]).map_err(|e| format!("sql error: {e}"))?;
    let column_count = rows.as_ref().map(|s| s.column_count()).unwrap_or(0);
    let result_columns: Vec<String> = (0..column_count)
        .map(|i| {
            rows.as_ref()
                .and_then(|s| s.column_name(i).ok())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "?".to_string())
        })
        .collect();

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| format!("sql error: {e}"))? {
        let mut obj = Map::new();
        for (i, name) in result_columns.iter().enumerate() {
            obj.insert(name.clone(), cell_to_json(row, i));
        }
        out.push(Value::Object(obj));
        if out.len() >= max_rows {
            break;
        }
    }
    Ok(out)
}

/// Convert one result cell to JSON, trying the concrete types in order.
/// DuckDB's wider integer types come back through the `f64` path, which
/// is exactly the "arbitrary precision → ordinary number" conversion the
/// serialization layer needs.
fn cell_to_json(row: &duckdb::Row, i: usize) -> Value {
    if let Ok(v) = row.get::<_, i64>(i) {
        return Value::from(v);
    }
    if let Ok(v) = row.get::<_, f64>(i) {
        return serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.get::<_, bool>(i) {
        return Value::Bool(v);
    }
    if let Ok(v) = row.get::<_, String>(i) {
        return Value::String(v);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_temp_table_name_sanitized() {
        assert_eq!(
            temp_table_name("vault-12ab-34cd"),
            "vault_vault_12ab_34cd"
        );
        assert_eq!(temp_table_name("x; DROP --"), "vault_xDROP");
    }

    #[test]
    fn test_prepare_sql_appends_limit() {
        let sql = prepare_sql("SELECT * FROM {table}", "vault_t", 10000);
        assert_eq!(sql, "SELECT * FROM vault_t LIMIT 10000");
    }

    #[test]
    fn test_prepare_sql_strips_trailing_semicolon() {
        let sql = prepare_sql("SELECT a FROM {table};", "vault_t", 10000);
        assert_eq!(sql, "SELECT a FROM vault_t LIMIT 10000");
    }

    #[test]
    fn test_prepare_sql_respects_existing_limit() {
        let sql = prepare_sql("SELECT * FROM {table} limit 7", "vault_t", 10000);
        assert_eq!(sql, "SELECT * FROM vault_t limit 7");
    }

    #[test]
    fn test_sql_types_from_first_row() {
        assert_eq!(sql_type_for(&json!(3)), "BIGINT");
        assert_eq!(sql_type_for(&json!(3.5)), "DOUBLE");
        assert_eq!(sql_type_for(&json!(true)), "BOOLEAN");
        assert_eq!(sql_type_for(&json!("2026-01-01")), "TIMESTAMP");
        assert_eq!(sql_type_for(&json!("plain")), "VARCHAR");
        assert_eq!(sql_type_for(&json!({"a": 1})), "VARCHAR");
        assert_eq!(sql_type_for(&json!([1])), "VARCHAR");
    }

    #[test]
    fn test_sql_literal_quoting() {
        assert_eq!(sql_literal(None), "NULL");
        assert_eq!(sql_literal(Some(&Value::Null)), "NULL");
        assert_eq!(sql_literal(Some(&json!("o'clock"))), "'o''clock'");
        assert_eq!(sql_literal(Some(&json!(42))), "42");
        assert_eq!(sql_literal(Some(&json!(true))), "TRUE");
        assert_eq!(
            sql_literal(Some(&json!({"k": "v"}))),
            "'{\"k\":\"v\"}'"
        );
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
