//! Seed command implementation

use super::DatabaseArgs;
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use loadfold_shared::types::aggregate::AggregateKey;
use loadfold_shared::utils::time::slices_per_day;

#[derive(Args, Debug)]
pub struct SeedArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Plug ids to create buckets for (comma-separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub plugs: Vec<i32>,

    /// Width of one time slice in minutes; must divide a day evenly
    #[arg(long, default_value = "15")]
    pub slice_minutes: u32,
}

/// Every `(weekday, time_slice, plug_id)` bucket for the given plugs.
pub fn bucket_keys(plugs: &[i32], slice_minutes: u32) -> Result<Vec<AggregateKey>> {
    let slices = slices_per_day(slice_minutes)? as i32;
    let mut keys = Vec::with_capacity(7 * slices as usize * plugs.len());
    for weekday in 0..7 {
        for time_slice in 0..slices {
            for &plug_id in plugs {
                keys.push(AggregateKey::new(weekday, time_slice, plug_id));
            }
        }
    }
    Ok(keys)
}

pub async fn run(args: SeedArgs) -> Result<()> {
    let mut plugs = args.plugs.clone();
    plugs.sort_unstable();
    plugs.dedup();

    let keys = bucket_keys(&plugs, args.slice_minutes)?;
    let connector = args.db.connector()?;

    connector
        .ensure_table()
        .await
        .with_context(|| format!("Failed to create table {}", connector.table()))?;
    output::info(&format!("Table {} is ready", connector.table()));

    let created = connector
        .seed(&keys)
        .await
        .context("Failed to seed aggregate rows")?;

    let existing = keys.len() as u64 - created.min(keys.len() as u64);
    output::success(&format!(
        "Seeded {} bucket(s) for {} plug(s)",
        created,
        plugs.len()
    ));
    if existing > 0 {
        output::warning(&format!("{} bucket(s) already existed and were left as is", existing));
    }
    Ok(())
}
