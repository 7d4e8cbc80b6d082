//! Data types shared across crates

pub mod aggregate;
pub mod events;
