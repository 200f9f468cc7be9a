// src/config/mod.rs
pub mod aggregator;

pub use aggregator::{AggregatorConfig, LimitBounds, SourceSettings};
