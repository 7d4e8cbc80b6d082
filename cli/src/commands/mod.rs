//! Command implementations

pub mod averages;
pub mod seed;
pub mod simulate;

use anyhow::Result;
use loadfold_aggregator::config::is_valid_identifier;
use loadfold_aggregator::storage::postgres::PgConnector;

/// Postgres target shared by the table commands
#[derive(clap::Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Postgres connection URL
    #[arg(long, env = "LOADFOLD_DATABASE_URL")]
    pub database_url: String,

    /// Aggregate table name
    #[arg(long, default_value = "load_averages")]
    pub table: String,
}

impl DatabaseArgs {
    pub fn connector(&self) -> Result<PgConnector> {
        if !is_valid_identifier(&self.table) {
            anyhow::bail!("'{}' is not a valid table name", self.table);
        }
        Ok(PgConnector::new(self.database_url.clone(), self.table.clone()))
    }
}
