//! Network surfaces of the aggregator service

pub mod http;
