//! Feed wire format: one JSON batch envelope per line.
//!
//! ```text
//! {"version":1,"sequence":42,"events":[{"type":"after_insert","fields":{...}}]}
//! ```
//!
//! Simple producers may also write a bare JSON array of events per line; such
//! lines decode to a batch with sequence 0.

use crate::types::events::ChangeEvent;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Batch envelope delivered by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub version: u32,
    pub sequence: u64,
    pub events: Vec<ChangeEvent>,
}

impl EventBatch {
    /// Create a new batch
    pub fn new(sequence: u64, events: Vec<ChangeEvent>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            events,
        }
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize event batch")
    }

    /// Decode one feed line, validating the protocol version.
    ///
    /// A line starting with `{` must be a batch envelope; anything else is
    /// decoded as a bare array of events.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            anyhow::bail!("empty feed line");
        }

        if line.starts_with('{') {
            let batch: Self =
                serde_json::from_str(line).context("failed to decode batch envelope")?;
            if batch.version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "unsupported protocol version {} (expected {})",
                    batch.version,
                    PROTOCOL_VERSION
                );
            }
            return Ok(batch);
        }

        let events: Vec<ChangeEvent> =
            serde_json::from_str(line).context("failed to decode event array")?;
        Ok(Self::new(0, events))
    }
}
