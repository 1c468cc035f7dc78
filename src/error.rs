//! Error types for the data vault.
//!
//! Five kinds, surfaced uniformly across the store, pipeline, query engine,
//! and HTTP layer:
//!
//! | Kind | Meaning | HTTP |
//! |------|---------|------|
//! | [`VaultError::DataNotFound`] | Handle missing, expired, wrong owner, or wrong token | 404 |
//! | [`VaultError::AnalysisFailure`] | Analysis agent unreachable or reply malformed | 500 |
//! | [`VaultError::QueryError`] | SQL compile/execute error or timeout | 500 |
//! | [`VaultError::ValidationError`] | Bad input or invalid startup configuration | 400 |
//! | [`VaultError::BackendError`] | Store connectivity or transient network failure | 500 |
//!
//! `DataNotFound` deliberately collapses "missing", "expired", "wrong owner"
//! and "wrong token" into a single indistinguishable kind so a caller cannot
//! probe for the existence of another principal's handles.

use thiserror::Error;

/// Maximum number of characters of the offending SQL carried in a
/// [`VaultError::QueryError`].
pub const QUERY_HEAD_CHARS: usize = 80;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Handle missing, expired, wrong owner, or wrong token.
    ///
    /// The display string includes the sanctioned recovery hint: the only
    /// way forward is to re-run the tool that produced the data.
    #[error(
        "no vault data found for handle {handle}; do not retry with this handle — \
         call the original tool that produced the data again to obtain a fresh handle"
    )]
    DataNotFound { handle: String },

    /// The analysis agent failed: unreachable, timed out, returned
    /// malformed JSON, or omitted a required field. Never substituted
    /// with heuristic extraction.
    #[error("analysis failed: {0}")]
    AnalysisFailure(String),

    /// SQL compile/execute failure, including the 30-second timeout.
    /// Carries the first [`QUERY_HEAD_CHARS`] chars of the query.
    #[error("query against handle {handle} failed ({message}); query: {query_head}")]
    QueryError {
        handle: String,
        query_head: String,
        message: String,
    },

    /// Input rejected before any side effect: non-array or empty vault
    /// put, empty analysis paths, invalid configuration at startup.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Store connectivity or other transient backend failure.
    #[error("backend error: {0}")]
    BackendError(String),
}

impl VaultError {
    /// Construct a [`VaultError::DataNotFound`] for a handle.
    pub fn not_found(handle: impl Into<String>) -> Self {
        VaultError::DataNotFound {
            handle: handle.into(),
        }
    }

    /// Construct a [`VaultError::QueryError`], truncating the query to
    /// its first [`QUERY_HEAD_CHARS`] characters for diagnosis.
    pub fn query(handle: impl Into<String>, sql: &str, message: impl Into<String>) -> Self {
        VaultError::QueryError {
            handle: handle.into(),
            query_head: sql.chars().take(QUERY_HEAD_CHARS).collect(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::BackendError(format!("serialization failed: {e}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Redact a principal identifier for logging: keep only the last 8 chars.
///
/// Tokens are never logged at all; principals are logged as tails so log
/// lines can be correlated without reproducing a full identity string.
pub fn principal_tail(principal: &str) -> String {
    let chars: Vec<char> = principal.chars().collect();
    if chars.len() <= 8 {
        principal.to_string()
    } else {
        format!("…{}", chars[chars.len() - 8..].iter().collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_truncates_sql() {
        let sql = "SELECT ".repeat(40);
        let err = VaultError::query("vault-x", &sql, "boom");
        match err {
            VaultError::QueryError { query_head, .. } => {
                assert_eq!(query_head.chars().count(), QUERY_HEAD_CHARS);
            }
            _ => panic!("expected QueryError"),
        }
    }

    #[test]
    fn test_not_found_includes_recovery_hint() {
        let err = VaultError::not_found("vault-abc");
        let msg = err.to_string();
        assert!(msg.contains("vault-abc"));
        assert!(msg.contains("do not retry"));
        assert!(msg.contains("original tool"));
    }

    #[test]
    fn test_principal_tail_redacts_long_ids() {
        assert_eq!(principal_tail("did:plc:abcdefgh12345678"), "…12345678");
        assert_eq!(principal_tail("short"), "short");
    }
}
