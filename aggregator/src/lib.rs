//! Streaming sum/count aggregation of plug load readings
//!
//! Change events arrive in batches from a feed; every `after_insert` event is
//! folded into the `(total_load, event_count)` bucket of its
//! `(weekday, time_slice, plug_id)` key in a row store.

pub mod audit;
pub mod config;
pub mod error;
pub mod feed;
pub mod fold;
pub mod listener;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod worker;

pub use error::{AggregatorError, Result};
pub use fold::{Aggregator, BatchReport, DropReason, DroppedEvent, FoldSettings};
pub use listener::AggregationListener;
