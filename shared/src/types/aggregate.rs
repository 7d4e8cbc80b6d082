//! Aggregate bucket types
//!
//! One `AggregateRow` exists per `AggregateKey` in the `load_averages` table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite key identifying one aggregate bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub weekday: i32,
    pub time_slice: i32,
    pub plug_id: i32,
}

impl AggregateKey {
    pub fn new(weekday: i32, time_slice: i32, plug_id: i32) -> Self {
        Self {
            weekday,
            time_slice,
            plug_id,
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(weekday={}, time_slice={}, plug_id={})",
            self.weekday, self.time_slice, self.plug_id
        )
    }
}

/// Running sum and count for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateRow {
    pub total_load: f64,
    pub event_count: i64,
}

impl AggregateRow {
    pub fn new(total_load: f64, event_count: i64) -> Self {
        Self {
            total_load,
            event_count,
        }
    }

    /// Row created by the first fold into an empty bucket
    pub fn first(value: f64) -> Self {
        Self::new(value, 1)
    }

    /// Incorporate one measurement
    pub fn fold(self, value: f64) -> Self {
        Self {
            total_load: self.total_load + value,
            event_count: self.event_count + 1,
        }
    }

    /// Mean of the folded values, or `None` for a bucket with no folds yet
    pub fn average(&self) -> Option<f64> {
        if self.event_count == 0 {
            return None;
        }
        Some(self.total_load / self.event_count as f64)
    }
}
