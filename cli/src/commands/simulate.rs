//! Simulate command implementation
//!
//! Produces a feed the aggregator can read on stdin:
//! `loadfold simulate --plugs 1,2 | loadfold-aggregator`

use anyhow::{Context, Result};
use clap::Args;
use loadfold_shared::protocol::wire::EventBatch;
use loadfold_shared::types::events::{
    ChangeEvent, FieldValue, PLUG_ID_COLUMN, TIME_SLICE_COLUMN, WEEKDAY_COLUMN,
};
use loadfold_shared::utils::time::{bucket_of, now_secs, slices_per_day};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{BufWriter, ErrorKind, Write};
use tracing::debug;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Plug ids to emit readings for (comma-separated)
    #[arg(short, long, value_delimiter = ',', default_value = "1")]
    pub plugs: Vec<i32>,

    /// Number of batches to write
    #[arg(short, long, default_value = "10")]
    pub batches: u64,

    /// Reading rounds per batch (each round has one reading per plug)
    #[arg(long, default_value = "10")]
    pub rounds_per_batch: u32,

    /// Unix timestamp of the first reading (defaults to now)
    #[arg(long)]
    pub start: Option<i64>,

    /// Seconds between reading rounds
    #[arg(long, default_value = "60")]
    pub step_secs: i64,

    /// Width of one time slice in minutes
    #[arg(long, default_value = "15")]
    pub slice_minutes: u32,

    /// Column carrying the measurement
    #[arg(long, default_value = "value")]
    pub value_column: String,

    /// Average load around which readings vary
    #[arg(long, default_value = "100.0")]
    pub mean_load: f64,

    /// Maximum random deviation from the daily load curve
    #[arg(long, default_value = "10.0")]
    pub jitter: f64,

    /// Random seed, for reproducible feeds
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Deterministic-per-seed reading generator
pub struct Simulator {
    args: SimulateArgs,
    rng: StdRng,
    clock: i64,
    sequence: u64,
}

impl Simulator {
    pub fn new(args: SimulateArgs) -> Result<Self> {
        slices_per_day(args.slice_minutes)?;
        if args.plugs.is_empty() {
            anyhow::bail!("at least one plug id is required");
        }
        if args.step_secs <= 0 {
            anyhow::bail!("--step-secs must be positive");
        }
        let rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            clock: args.start.unwrap_or_else(now_secs),
            args,
            rng,
            sequence: 0,
        })
    }

    /// Load curve peaking in the evening, scaled around `mean_load`.
    fn load_at(&mut self, timestamp: i64) -> f64 {
        let day_fraction = timestamp.rem_euclid(86_400) as f64 / 86_400.0;
        let curve = 1.0 + 0.5 * (2.0 * std::f64::consts::PI * (day_fraction - 0.5)).sin();
        let noise = if self.args.jitter > 0.0 {
            self.rng.gen_range(-self.args.jitter..=self.args.jitter)
        } else {
            0.0
        };
        (self.args.mean_load * curve + noise).max(0.0)
    }

    pub fn next_batch(&mut self) -> Result<EventBatch> {
        let mut events =
            Vec::with_capacity(self.args.rounds_per_batch as usize * self.args.plugs.len());
        for _ in 0..self.args.rounds_per_batch {
            let (weekday, time_slice) = bucket_of(self.clock, self.args.slice_minutes)?;
            for i in 0..self.args.plugs.len() {
                let plug_id = self.args.plugs[i];
                let value = self.load_at(self.clock);
                events.push(ChangeEvent::insert([
                    (WEEKDAY_COLUMN, FieldValue::Int(weekday as i64)),
                    (TIME_SLICE_COLUMN, FieldValue::Int(time_slice as i64)),
                    (PLUG_ID_COLUMN, FieldValue::Int(plug_id as i64)),
                    (self.args.value_column.as_str(), FieldValue::Float(value)),
                ]));
            }
            self.clock += self.args.step_secs;
        }
        self.sequence += 1;
        Ok(EventBatch::new(self.sequence, events))
    }
}

pub fn run(args: SimulateArgs) -> Result<()> {
    let batches = args.batches;
    let mut simulator = Simulator::new(args)?;
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    for _ in 0..batches {
        let line = simulator.next_batch()?.to_json_line()?;
        if let Err(e) = writeln!(out, "{}", line) {
            if e.kind() == ErrorKind::BrokenPipe {
                debug!("Reader went away after {} batches", simulator.sequence);
                return Ok(());
            }
            return Err(e).context("Failed to write batch");
        }
    }
    match out.flush() {
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other.context("Failed to flush output"),
    }
}
