//! Wire protocol definitions
//!
//! This module defines the envelope in which the feed delivers batches of
//! change events to the aggregator.

pub mod wire;
