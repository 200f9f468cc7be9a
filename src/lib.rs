// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod singleflight;
pub mod snapshot;
pub mod theme;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{AggregationResult, Aggregator, CacheStatus, SourceState, SourceStatus};
pub use crate::api::router;
pub use crate::cluster::{Cluster, Clusterer, ThemeGroup};
pub use crate::error::{AggregateError, SourceError};
pub use crate::ingest::types::{DynAdapter, SourceAdapter};
pub use crate::snapshot::{Snapshot, Source};

use axum::Router;
use tracing::info;

use crate::api::AppState;
use crate::config::AggregatorConfig;
use crate::ingest::providers::build_http_adapters;
use crate::metrics::Metrics;
use crate::theme::ThemeClassifier;

/// Full service router: live HTTP adapters per config, theme taxonomy from
/// `config/themes.toml` when present, `/metrics` included.
pub async fn app() -> anyhow::Result<Router> {
    // recorder before the aggregator so construction-time gauges land in it
    Metrics::init()?;
    let cfg = AggregatorConfig::load_default()?;
    let clock = clock::system();
    let adapters = build_http_adapters(&cfg, &clock)?;
    info!(
        sources = adapters.len(),
        response_ttl_ms = cfg.response_ttl_ms,
        "aggregator configured"
    );
    let clusterer = Clusterer::new(ThemeClassifier::from_toml());
    let aggregator = Aggregator::new(adapters, &cfg, clusterer, clock);
    app_with(aggregator)
}

/// Router around an already-built aggregator (tests inject fixture adapters).
/// Call [`Metrics::init`] before building the aggregator to keep its gauges.
pub fn app_with(aggregator: Aggregator) -> anyhow::Result<Router> {
    let metrics = Metrics::init()?;
    Ok(router(AppState { aggregator }).merge(metrics.router()))
}
