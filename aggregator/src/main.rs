//! loadfold aggregator service
//!
//! Reads JSON-lines event batches from stdin and folds every `after_insert`
//! event into the configured row store. Configuration comes from defaults, the
//! TOML file named by `LOADFOLD_CONFIG`, and `LOADFOLD_*` environment variables.

use anyhow::{Context, Result};
use loadfold_aggregator::{
    config::{AggregatorConfig, LogFormat, StorageConfig},
    feed, server, storage, AggregationListener,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os("LOADFOLD_CONFIG").map(PathBuf::from);
    let config = AggregatorConfig::load(config_path.as_deref())?;
    init_tracing(config.log_format);
    config.validate().context("Invalid configuration")?;

    let value_column = config.value_column.clone().context(
        "value_column is not configured (set LOADFOLD_VALUE_COLUMN or value_column in the config file)",
    )?;
    let store_timeout = config.store_timeout()?;
    if matches!(config.storage, StorageConfig::InMemory) {
        warn!("Using in-memory storage; aggregates are not persisted");
    }
    let connector = storage::connector_from_config(&config.storage, store_timeout);

    let listener = Arc::new(AggregationListener::new(connector, config.clone()));
    listener.init(&value_column)?;
    listener.start().await.context("Start worker pool")?;

    let cancel = CancellationToken::new();
    let admin_addr: SocketAddr = config
        .admin_addr
        .parse()
        .context("Invalid admin address")?;
    let admin = tokio::spawn(server::http::serve_admin(admin_addr, cancel.clone()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    info!("Reading event batches from stdin");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stats = feed::run(
        stdin,
        listener.clone(),
        config.max_in_flight_batches,
        cancel.clone(),
    )
    .await;

    listener.close().await;
    cancel.cancel();
    match admin.await {
        Ok(Err(e)) => warn!("Admin HTTP server error: {}", e),
        Err(e) => warn!("Admin HTTP server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let stats = stats?;
    info!(
        "Feed finished: {} batches, {} events, {} malformed lines, {} rejected batches",
        stats.batches, stats.events, stats.malformed_lines, stats.rejected_batches
    );
    Ok(())
}
