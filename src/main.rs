//! # Data Vault CLI (`dv`)
//!
//! Operational interface to a running vault deployment. The pipeline
//! itself is embedded in the upstream agent host as a library; the CLI
//! covers the standalone surfaces — serving the retrieval API and poking
//! at vaulted handles during development.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dv serve` | Start the HTTP retrieval API |
//! | `dv query` | Run a SQL aggregation against a vaulted handle |
//! | `dv fetch` | Retrieve the full dataset behind a handle |
//!
//! ## Examples
//!
//! ```bash
//! export REDIS_URL=redis://127.0.0.1:6379
//!
//! # Serve the retrieval API
//! dv serve --bind 0.0.0.0:8787
//!
//! # Average a column over a vaulted dataset
//! dv query --handle vault-9be4... --owner did:user:alice --token 4f0c... \
//!     --sql 'SELECT AVG(amount) AS avg FROM {table}'
//!
//! # Fetch the first 20 rows
//! dv fetch --handle vault-9be4... --owner did:user:alice --token 4f0c... --limit 20
//! ```

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use data_vault::backend::RedisBackend;
use data_vault::config::Config;
use data_vault::query::{QueryEngine, QueryRequest};
use data_vault::server;
use data_vault::store::VaultStore;

/// Data Vault — a side-channel cache and query layer for LLM tool results.
///
/// All configuration is read from the environment; `REDIS_URL` is
/// required. See the crate documentation for the full variable list.
#[derive(Parser)]
#[command(
    name = "dv",
    about = "Data Vault — a side-channel cache and query layer for LLM tool results",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP retrieval API.
    ///
    /// Serves `GET /data-vault/{handle_id}` (header-authenticated) and
    /// `GET /health` until the process is terminated.
    Serve {
        /// Bind address. Overrides `DATA_VAULT_BIND`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a SQL query against a vaulted handle.
    ///
    /// The query runs in the embedded engine with the handle's data
    /// mounted as a temporary table; use `{table}` as the table name.
    Query {
        /// Vault handle (`vault-<uuid>`).
        #[arg(long)]
        handle: String,
        /// Owner principal recorded at store time.
        #[arg(long)]
        owner: String,
        /// Fetch token minted with the handle.
        #[arg(long)]
        token: String,
        /// SQL statement; `{table}` is replaced with the temp table name.
        #[arg(long)]
        sql: String,
    },

    /// Retrieve the full dataset behind a handle (no SQL).
    Fetch {
        /// Vault handle (`vault-<uuid>`).
        #[arg(long)]
        handle: String,
        /// Owner principal recorded at store time.
        #[arg(long)]
        owner: String,
        /// Fetch token minted with the handle.
        #[arg(long)]
        token: String,
        /// Maximum number of rows to return.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn build_store(config: &Config) -> Result<Arc<VaultStore>> {
    let backend = RedisBackend::connect(&config.redis_url)?;
    Ok(Arc::new(VaultStore::new(
        Arc::new(backend),
        config.offload.clone(),
        config.ttl.clone(),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { bind } => {
            let store = build_store(&config)?;
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            server::run_server(&bind, store).await?;
        }
        Commands::Query {
            handle,
            owner,
            token,
            sql,
        } => {
            let store = build_store(&config)?;
            let engine = QueryEngine::new(store, config.query.clone())?;
            let result = engine
                .execute_query(&QueryRequest {
                    handle,
                    sql,
                    principal: owner,
                    token,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Fetch {
            handle,
            owner,
            token,
            limit,
        } => {
            let store = build_store(&config)?;
            let engine = QueryEngine::new(store, config.query.clone())?;
            let result = engine
                .retrieve_full_data(&handle, &owner, &token, limit)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
