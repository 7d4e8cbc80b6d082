//! Averages command implementation

use super::DatabaseArgs;
use anyhow::{Context, Result};
use clap::Args;
use loadfold_aggregator::storage::postgres::RowFilter;
use loadfold_shared::types::aggregate::{AggregateKey, AggregateRow};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct AveragesArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Only show this plug
    #[arg(long)]
    pub plug: Option<i32>,

    /// Only show this weekday (0 = Monday)
    #[arg(long, value_parser = clap::value_parser!(i32).range(0..7))]
    pub weekday: Option<i32>,

    /// Hide buckets that have not received any reading
    #[arg(long)]
    pub non_empty: bool,

    /// Print JSON lines instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct AverageLine {
    #[serde(flatten)]
    key: AggregateKey,
    #[serde(flatten)]
    row: AggregateRow,
    average: Option<f64>,
}

pub async fn run(args: AveragesArgs) -> Result<()> {
    let connector = args.db.connector()?;
    let rows = connector
        .list_rows(RowFilter {
            plug_id: args.plug,
            weekday: args.weekday,
        })
        .await
        .context("Failed to read aggregate rows")?;

    let rows: Vec<_> = rows
        .into_iter()
        .filter(|(_, row)| !args.non_empty || row.event_count > 0)
        .collect();

    if args.json {
        for (key, row) in rows {
            let line = AverageLine {
                key,
                row,
                average: row.average(),
            };
            println!("{}", serde_json::to_string(&line)?);
        }
        return Ok(());
    }

    if rows.is_empty() {
        println!("No aggregate rows found.");
        return Ok(());
    }

    println!(
        "  {:>7} {:>10} {:>7} {:>14} {:>8} {:>12}",
        "WEEKDAY", "TIME_SLICE", "PLUG", "TOTAL_LOAD", "COUNT", "AVERAGE"
    );
    for (key, row) in &rows {
        let average = row
            .average()
            .map(|avg| format!("{:.3}", avg))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>7} {:>10} {:>7} {:>14.3} {:>8} {:>12}",
            key.weekday, key.time_slice, key.plug_id, row.total_load, row.event_count, average
        );
    }
    println!("{} row(s)", rows.len());
    Ok(())
}
