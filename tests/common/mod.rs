// tests/common/mod.rs
// Shared helpers for integration tests: scripted adapters and snapshot builders.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prediction_aggregator::config::AggregatorConfig;
use prediction_aggregator::{DynAdapter, Snapshot, Source, SourceAdapter, SourceError};

pub fn snap(source: Source, id: &str, title: &str, price: f64) -> Snapshot {
    Snapshot::new(source, id, title, price, 1_700_000_000_000).expect("valid snapshot")
}

/// Adapter returning canned snapshots, with call counting and switchable
/// failure modes.
pub struct MockAdapter {
    pub source: Source,
    pub snapshots: Vec<Snapshot>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub panic: bool,
    pub delay: Duration,
}

impl MockAdapter {
    pub fn new(source: Source, titles: &[&str]) -> Self {
        let snapshots = titles
            .iter()
            .enumerate()
            .map(|(i, t)| snap(source, &format!("{}-{i}", source.as_str()), t, 0.5))
            .collect();
        Self {
            source,
            snapshots,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            panic: false,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn delayed(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Snapshot>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic {
            panic!("scripted adapter panic");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable("HTTP 503"));
        }
        Ok(self.snapshots.iter().take(limit).cloned().collect())
    }
}

pub fn dyns(adapters: &[Arc<MockAdapter>]) -> Vec<DynAdapter> {
    adapters.iter().map(|a| a.clone() as DynAdapter).collect()
}

/// Defaults with short timeouts so failing paths finish quickly.
pub fn test_config() -> AggregatorConfig {
    let mut cfg = AggregatorConfig::default();
    for s in [&mut cfg.kalshi, &mut cfg.manifold, &mut cfg.polymarket] {
        s.timeout_ms = 500;
        s.max_retries = 0;
    }
    cfg
}
