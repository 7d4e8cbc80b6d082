//! Aggregator configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `LOADFOLD_*` environment variables (nested keys use `__`, e.g.
//! `LOADFOLD_STORAGE__URL`).

use anyhow::{Context, Result};
use loadfold_shared::utils::parse_duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default name of the aggregate table
pub const DEFAULT_TABLE: &str = "load_averages";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Event column that supplies the measurement to fold (e.g. "value", "cpu_load")
    pub value_column: Option<String>,

    /// Admin HTTP listen address (health checks + metrics)
    pub admin_addr: String,

    /// Storage backend configuration
    pub storage: StorageConfig,

    /// Number of workers, each owning one row-store connection
    pub workers: usize,

    /// Pending batches per worker queue
    pub queue_depth: usize,

    /// Batches the feed reader keeps in flight at once
    pub max_in_flight_batches: usize,

    /// Bound on every row-store call, e.g. "5s" or "250ms"
    pub store_timeout: String,

    pub fold_mode: FoldMode,

    pub missing_row: MissingRowPolicy,

    pub failure_policy: FailurePolicy,

    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    Postgres {
        url: String,
        #[serde(default = "default_table")]
        table: String,
    },
    InMemory,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

/// How a measurement is folded into its bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldMode {
    /// Single `total = total + ?, count = count + 1` statement
    Atomic,
    /// Lookup followed by a separate update; concurrent folds into one key can be lost
    ReadModifyWrite,
}

/// What happens to an event whose bucket row does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRowPolicy {
    /// Drop the event; rows are created by an external initializer
    Skip,
    /// Create the row as `(value, 1)`, including when it disappears between
    /// the lookup and the update in `read_modify_write` mode
    Upsert,
}

/// Whether a failed event aborts the rest of its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    BestEffort,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            value_column: None,
            admin_addr: "0.0.0.0:9090".to_string(),
            storage: StorageConfig::InMemory,
            workers: 4,
            queue_depth: 64,
            max_in_flight_batches: 16,
            store_timeout: "5s".to_string(),
            fold_mode: FoldMode::Atomic,
            missing_row: MissingRowPolicy::Skip,
            failure_policy: FailurePolicy::BestEffort,
            log_format: LogFormat::Text,
        }
    }
}

impl AggregatorConfig {
    /// Load defaults, then `path` (if any), then `LOADFOLD_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AggregatorConfig::default())
            .context("Serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("LOADFOLD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Read configuration sources")?;

        settings
            .try_deserialize()
            .context("Deserialize aggregator configuration")
    }

    /// Parsed `store_timeout`
    pub fn store_timeout(&self) -> Result<Duration> {
        parse_duration(&self.store_timeout)
            .with_context(|| format!("Invalid store_timeout '{}'", self.store_timeout))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }
        if self.queue_depth == 0 {
            anyhow::bail!("queue_depth must be greater than 0");
        }
        if self.max_in_flight_batches == 0 {
            anyhow::bail!("max_in_flight_batches must be greater than 0");
        }
        if let Some(column) = &self.value_column {
            if column.trim().is_empty() {
                anyhow::bail!("value_column must not be empty");
            }
        }
        if self.store_timeout()?.is_zero() {
            anyhow::bail!("store_timeout must be greater than 0");
        }
        if let StorageConfig::Postgres { url, table } = &self.storage {
            if url.trim().is_empty() {
                anyhow::bail!("storage.url must not be empty");
            }
            if !is_valid_identifier(table) {
                anyhow::bail!("storage.table '{}' is not a valid SQL identifier", table);
            }
        }
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers
/// (`[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified once) are accepted.
pub fn is_valid_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}
