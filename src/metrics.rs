use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process; later calls reuse
    /// the same handle) and describe the engine's series.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = HANDLE
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())?
            .clone();
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("source_fetch_total", "Upstream fetches per source, by outcome.");
    describe_counter!("source_cache_hits_total", "Source reads served from a fresh cache entry.");
    describe_counter!("aggregate_runs_total", "Aggregation runs, by outcome (ok/partial/failed).");
    describe_counter!("response_cache_total", "Top-level cache lookups (hit/miss/stale/error).");
    describe_histogram!("cluster_duration_ms", "Clustering time per run in milliseconds.");
    describe_gauge!("response_cache_ttl_ms", "Configured top-level response TTL.");
}
