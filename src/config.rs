//! Environment-driven configuration.
//!
//! The vault is configured entirely from the environment, since it runs
//! embedded inside an upstream agent host rather than as a standalone
//! deployable with its own config file:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `REDIS_URL` | — (required) | Key-value backend URL |
//! | `DATA_VAULT_MAX_INLINE_ROWS` | 100 | Offload threshold: row count |
//! | `DATA_VAULT_MAX_INLINE_BYTES` | 51200 | Offload threshold: serialized bytes |
//! | `DATA_VAULT_MAX_INLINE_TOKENS` | 10000 | Offload threshold: estimated tokens |
//! | `DATA_VAULT_TTL_SECONDS` | 1800 | Entry lifetime |
//! | `DATA_VAULT_GRACE_PERIOD_SECONDS` | 300 | Lifetime after first retrieval |
//! | `DATA_VAULT_BIND` | `127.0.0.1:8787` | Retrieval API bind address |
//! | `DATA_VAULT_ANALYSIS_BASE_URL` | `https://api.openai.com/v1` | Analysis LLM endpoint |
//! | `DATA_VAULT_ANALYSIS_MODEL` | `gpt-4o-mini` | Analysis model |
//! | `DATA_VAULT_ANALYSIS_TIMEOUT_SECONDS` | 10 | Analysis call deadline |
//! | `OPENAI_API_KEY` | — | Analysis credential (checked at client construction) |
//!
//! [`Config::from_env`] validates at startup and fails fast with a
//! `ValidationError` on a missing `REDIS_URL`, unparsable numerics, zero
//! thresholds, or a grace period that is not shorter than the TTL.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, VaultError};

/// Top-level configuration, grouped by concern.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key-value backend URL (`redis://...`).
    pub redis_url: String,
    /// Retrieval API bind address.
    pub bind: String,
    pub offload: OffloadConfig,
    pub ttl: TtlConfig,
    pub analysis: AnalysisConfig,
    pub query: QueryConfig,
}

/// Thresholds deciding when a tool result is offloaded instead of kept
/// inline. A payload crossing *any* threshold is offloaded.
#[derive(Debug, Clone)]
pub struct OffloadConfig {
    pub max_inline_rows: usize,
    pub max_inline_bytes: usize,
    pub max_inline_tokens: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            max_inline_rows: 100,
            max_inline_bytes: 51200,
            max_inline_tokens: 10000,
        }
    }
}

/// Entry lifetime settings.
#[derive(Debug, Clone)]
pub struct TtlConfig {
    /// Lifetime of a fresh entry.
    pub ttl_seconds: u64,
    /// Lifetime applied once an entry has been read at least once.
    pub grace_period_seconds: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 1800,
            grace_period_seconds: 300,
        }
    }
}

impl TtlConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }
}

/// Analysis agent (LLM) client settings.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// OpenAI-compatible API base, without the trailing endpoint path.
    pub base_url: String,
    pub model: String,
    /// Hard deadline on the analysis round trip.
    pub timeout_secs: u64,
    /// Retries on 429/5xx responses.
    pub max_retries: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 10,
            max_retries: 1,
        }
    }
}

/// Query engine limits.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Row cap appended as `LIMIT` when the user SQL has none.
    pub max_result_rows: usize,
    /// Wall-clock cap on a single query.
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_result_rows: 10000,
            timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            bind: "127.0.0.1:8787".to_string(),
            offload: OffloadConfig::default(),
            ttl: TtlConfig::default(),
            analysis: AnalysisConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            VaultError::ValidationError(format!("{key} must be a valid number, got '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load and validate configuration from the environment.
    ///
    /// # Errors
    ///
    /// `ValidationError` on a missing `REDIS_URL`, unparsable numeric
    /// values, zero thresholds, or `grace_period >= ttl`.
    pub fn from_env() -> Result<Self> {
        let redis_url = std::env::var("REDIS_URL").map_err(|_| {
            VaultError::ValidationError("REDIS_URL must be set to the key-value backend URL".into())
        })?;

        let defaults = Config::default();
        let config = Config {
            redis_url,
            bind: std::env::var("DATA_VAULT_BIND").unwrap_or(defaults.bind),
            offload: OffloadConfig {
                max_inline_rows: env_or("DATA_VAULT_MAX_INLINE_ROWS", 100)?,
                max_inline_bytes: env_or("DATA_VAULT_MAX_INLINE_BYTES", 51200)?,
                max_inline_tokens: env_or("DATA_VAULT_MAX_INLINE_TOKENS", 10000)?,
            },
            ttl: TtlConfig {
                ttl_seconds: env_or("DATA_VAULT_TTL_SECONDS", 1800)?,
                grace_period_seconds: env_or("DATA_VAULT_GRACE_PERIOD_SECONDS", 300)?,
            },
            analysis: AnalysisConfig {
                base_url: std::env::var("DATA_VAULT_ANALYSIS_BASE_URL")
                    .unwrap_or(defaults.analysis.base_url),
                model: std::env::var("DATA_VAULT_ANALYSIS_MODEL")
                    .unwrap_or(defaults.analysis.model),
                timeout_secs: env_or("DATA_VAULT_ANALYSIS_TIMEOUT_SECONDS", 10)?,
                max_retries: defaults.analysis.max_retries,
            },
            query: QueryConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants across the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.redis_url.trim().is_empty() {
            return Err(VaultError::ValidationError(
                "REDIS_URL must not be empty".into(),
            ));
        }
        if self.offload.max_inline_rows == 0 {
            return Err(VaultError::ValidationError(
                "DATA_VAULT_MAX_INLINE_ROWS must be > 0".into(),
            ));
        }
        if self.offload.max_inline_bytes == 0 {
            return Err(VaultError::ValidationError(
                "DATA_VAULT_MAX_INLINE_BYTES must be > 0".into(),
            ));
        }
        if self.ttl.ttl_seconds == 0 {
            return Err(VaultError::ValidationError(
                "DATA_VAULT_TTL_SECONDS must be > 0".into(),
            ));
        }
        if self.ttl.grace_period_seconds >= self.ttl.ttl_seconds {
            return Err(VaultError::ValidationError(
                "DATA_VAULT_GRACE_PERIOD_SECONDS must be shorter than DATA_VAULT_TTL_SECONDS"
                    .into(),
            ));
        }
        if self.analysis.timeout_secs == 0 || self.analysis.timeout_secs > 10 {
            return Err(VaultError::ValidationError(
                "DATA_VAULT_ANALYSIS_TIMEOUT_SECONDS must be in 1..=10".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let c = Config::default();
        assert_eq!(c.offload.max_inline_rows, 100);
        assert_eq!(c.offload.max_inline_bytes, 51200);
        assert_eq!(c.offload.max_inline_tokens, 10000);
        assert_eq!(c.ttl.ttl_seconds, 1800);
        assert_eq!(c.ttl.grace_period_seconds, 300);
        assert_eq!(c.query.max_result_rows, 10000);
        assert_eq!(c.query.timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let c = Config::default();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_grace_not_shorter_than_ttl() {
        let mut c = Config {
            redis_url: "redis://localhost:6379".into(),
            ..Config::default()
        };
        c.ttl.grace_period_seconds = c.ttl.ttl_seconds;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let c = Config {
            redis_url: "redis://localhost:6379".into(),
            ..Config::default()
        };
        assert!(c.validate().is_ok());
    }
}
