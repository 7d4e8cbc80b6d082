//! Shared types and utilities for loadfold
//!
//! This crate contains the change-event and aggregate types exchanged between
//! the feed, the aggregator and the operator CLI, plus the feed wire envelope.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{aggregate::*, events::*};
