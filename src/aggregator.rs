//! # Aggregator
//! Fans out to every per-source cache, keeps per-source failures inside their
//! own branch, clusters what came back, and fronts the whole run with a
//! top-level [`ResponseCache`].
//!
//! Failure ladder:
//! - one source fails → its status is `error` (or `degraded` with older data),
//!   the others still contribute;
//! - every source fails → [`AggregateError::AllSourcesFailed`];
//! - a run fails → the last good result is served `stale` if younger than the
//!   ceiling, otherwise the error reaches the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{SourceCache, SourceRead};
use crate::clock::SharedClock;
use crate::cluster::{Cluster, Clusterer, ThemeGroup};
use crate::config::{AggregatorConfig, LimitBounds};
use crate::error::{AggregateError, SourceError};
use crate::ingest::dedup_by_key;
use crate::ingest::types::DynAdapter;
use crate::singleflight::{Role, SingleFlight};
use crate::snapshot::{Snapshot, Source};

pub const NO_SNAPSHOTS: &str = "no snapshots available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source: Source,
    pub status: SourceState,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<u64>,
}

impl SourceStatus {
    fn from_read(source: Source, res: &Result<SourceRead, SourceError>) -> Self {
        match res {
            Ok(r) => Self {
                source,
                status: if r.degraded.is_some() {
                    SourceState::Degraded
                } else {
                    SourceState::Ok
                },
                count: r.snapshots.len(),
                message: r.degraded.as_ref().map(ToString::to_string),
                fetched_at: Some(r.fetched_at),
            },
            Err(e) => Self {
                source,
                status: SourceState::Error,
                count: 0,
                message: Some(e.to_string()),
                fetched_at: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub snapshots: Vec<Snapshot>,
    pub clusters: Vec<Cluster>,
    pub themes: Vec<ThemeGroup>,
    pub sources: Vec<SourceStatus>,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: u64,
    pub limit: usize,
}

impl AggregationResult {
    pub fn status_of(&self, source: Source) -> Option<&SourceStatus> {
        self.sources.iter().find(|s| s.source == source)
    }
}

/// How a response was produced, surfaced as the `X-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    result: Arc<AggregationResult>,
    limit: usize,
    stored_at: u64,
    expires_at: u64,
}

type Computed = Result<Arc<AggregationResult>, AggregateError>;

/// Single-entry cache over whole aggregation results.
///
/// A hit needs an unexpired entry computed for the same limit. Concurrent
/// misses for one limit share one computation. When a computation fails, the
/// last stored result (any limit) is returned flagged `stale` as long as it
/// is no older than `stale_ceiling_ms`.
pub struct ResponseCache {
    ttl_ms: u64,
    stale_ceiling_ms: u64,
    clock: SharedClock,
    entry: Arc<Mutex<Option<CachedResponse>>>,
    flight: SingleFlight<usize, Computed>,
}

impl ResponseCache {
    pub fn new(ttl_ms: u64, stale_ceiling_ms: u64, clock: SharedClock) -> Self {
        gauge!("response_cache_ttl_ms").set(ttl_ms as f64);
        Self {
            ttl_ms,
            stale_ceiling_ms,
            clock,
            entry: Arc::new(Mutex::new(None)),
            flight: SingleFlight::new(),
        }
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        limit: usize,
        compute: F,
    ) -> Result<(Arc<AggregationResult>, CacheStatus), AggregateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AggregationResult, AggregateError>> + Send + 'static,
    {
        let now = self.clock.now_ms();
        let cached = lock(&self.entry).clone();
        if let Some(c) = cached {
            if c.limit == limit && now < c.expires_at {
                counter!("response_cache_total", "result" => "hit").increment(1);
                return Ok((c.result, CacheStatus::Hit));
            }
        }

        let slot = Arc::clone(&self.entry);
        let clock = Arc::clone(&self.clock);
        let ttl_ms = self.ttl_ms;
        let (res, role) = self
            .flight
            .run(limit, move || {
                let work = compute();
                async move {
                    let result = Arc::new(work.await?);
                    let stored_at = clock.now_ms();
                    *lock(&slot) = Some(CachedResponse {
                        result: Arc::clone(&result),
                        limit,
                        stored_at,
                        expires_at: stored_at.saturating_add(ttl_ms),
                    });
                    Ok(result)
                }
            })
            .await;

        match res {
            Ok(r) => {
                let status = match role {
                    Role::Leader => CacheStatus::Miss,
                    Role::Joiner => CacheStatus::Hit,
                };
                let label = if status == CacheStatus::Miss { "miss" } else { "hit" };
                counter!("response_cache_total", "result" => label).increment(1);
                Ok((r, status))
            }
            Err(e) => self.stale_fallback(e),
        }
    }

    fn stale_fallback(&self, err: AggregateError) -> Result<(Arc<AggregationResult>, CacheStatus), AggregateError> {
        let now = self.clock.now_ms();
        let prev = lock(&self.entry).clone();
        match prev {
            Some(c) if now.saturating_sub(c.stored_at) <= self.stale_ceiling_ms => {
                warn!(kind = err.kind(), error = %err, age_ms = now.saturating_sub(c.stored_at), "serving stale aggregation");
                counter!("response_cache_total", "result" => "stale").increment(1);
                let mut stale = (*c.result).clone();
                stale.stale = true;
                Ok((Arc::new(stale), CacheStatus::Stale))
            }
            _ => {
                warn!(kind = err.kind(), error = %err, "aggregation failed with no usable fallback");
                counter!("response_cache_total", "result" => "error").increment(1);
                Err(err)
            }
        }
    }
}

struct Engine {
    caches: Vec<SourceCache>,
    clusterer: Clusterer,
    clock: SharedClock,
}

impl Engine {
    async fn run(&self, limit: usize) -> Result<AggregationResult, AggregateError> {
        let t0 = Instant::now();
        let branches = self.caches.iter().map(|c| async move {
            let source = c.source();
            let res = match AssertUnwindSafe(c.get(limit)).catch_unwind().await {
                Ok(r) => r,
                Err(_) => Err(SourceError::rejected("source branch panicked")),
            };
            (source, res)
        });
        let reads = join_all(branches).await;

        let sources: Vec<SourceStatus> = reads
            .iter()
            .map(|(s, r)| SourceStatus::from_read(*s, r))
            .collect();
        let failed = sources.iter().filter(|s| s.status == SourceState::Error).count();
        if !reads.is_empty() && failed == reads.len() {
            counter!("aggregate_runs_total", "outcome" => "failed").increment(1);
            return Err(AggregateError::AllSourcesFailed(failed));
        }

        let snapshots = dedup_by_key(
            reads
                .into_iter()
                .filter_map(|(_, r)| r.ok())
                .flat_map(|r| r.snapshots)
                .collect(),
        );
        let (clusters, themes) = self.clusterer.cluster(&snapshots);
        let error = if snapshots.is_empty() {
            Some(NO_SNAPSHOTS.to_string())
        } else {
            None
        };

        let outcome = if failed > 0 || sources.iter().any(|s| s.status == SourceState::Degraded) {
            "partial"
        } else {
            "ok"
        };
        counter!("aggregate_runs_total", "outcome" => outcome).increment(1);
        info!(
            limit,
            snapshots = snapshots.len(),
            clusters = clusters.len(),
            failed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "aggregation run"
        );

        Ok(AggregationResult {
            snapshots,
            clusters,
            themes,
            sources,
            stale: false,
            error,
            generated_at: self.clock.now_ms(),
            limit,
        })
    }
}

/// Owns the per-source caches and the response cache. Cheap to clone; clones
/// share state. Separate instances share nothing.
#[derive(Clone)]
pub struct Aggregator {
    engine: Arc<Engine>,
    response: Arc<ResponseCache>,
    limits: LimitBounds,
}

impl Aggregator {
    pub fn new(
        adapters: Vec<DynAdapter>,
        cfg: &AggregatorConfig,
        clusterer: Clusterer,
        clock: SharedClock,
    ) -> Self {
        let caches = adapters
            .into_iter()
            .map(|a| {
                let s = cfg.source(a.source());
                SourceCache::new(a, s.ttl_ms, fetch_budget(s.timeout_ms, s.max_retries), Arc::clone(&clock))
            })
            .collect();
        Self {
            engine: Arc::new(Engine {
                caches,
                clusterer,
                clock: Arc::clone(&clock),
            }),
            response: Arc::new(ResponseCache::new(cfg.response_ttl_ms, cfg.stale_ceiling_ms, clock)),
            limits: cfg.limit,
        }
    }

    /// Current time on the aggregator's clock.
    pub fn now_ms(&self) -> u64 {
        self.engine.clock.now_ms()
    }

    pub fn limits(&self) -> LimitBounds {
        self.limits
    }

    pub fn sources(&self) -> Vec<Source> {
        self.engine.caches.iter().map(SourceCache::source).collect()
    }

    /// One uncached run. Executes on its own task so it finishes even if the
    /// caller goes away; a crashed task surfaces as `Internal`.
    pub async fn aggregate(&self, limit: usize) -> Result<AggregationResult, AggregateError> {
        run_detached(Arc::clone(&self.engine), limit).await
    }

    /// Clamp the requested limit and answer through the response cache.
    pub async fn get(
        &self,
        requested: Option<usize>,
    ) -> Result<(Arc<AggregationResult>, CacheStatus), AggregateError> {
        let limit = self.limits.clamp(requested);
        let engine = Arc::clone(&self.engine);
        self.response
            .get_or_compute(limit, move || run_detached(engine, limit))
            .await
    }
}

async fn run_detached(engine: Arc<Engine>, limit: usize) -> Result<AggregationResult, AggregateError> {
    match tokio::spawn(async move { engine.run(limit).await }).await {
        Ok(r) => r,
        Err(e) => Err(AggregateError::Internal(e.to_string())),
    }
}

/// Whole-fetch ceiling for one source: every attempt's timeout plus slack
/// for backoff and per-instrument lookups.
fn fetch_budget(timeout_ms: u64, max_retries: u32) -> Duration {
    Duration::from_millis(timeout_ms.saturating_mul(u64::from(max_retries) + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(limit: usize) -> AggregationResult {
        AggregationResult {
            snapshots: Vec::new(),
            clusters: Vec::new(),
            themes: Vec::new(),
            sources: Vec::new(),
            stale: false,
            error: None,
            generated_at: 0,
            limit,
        }
    }

    #[tokio::test]
    async fn hit_requires_same_limit_and_fresh_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(100, 1_000, clock.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        let compute = |limit: usize| {
            let runs = runs.clone();
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AggregateError>(sample(limit))
            }
        };

        let (_, s) = cache.get_or_compute(50, compute(50)).await.unwrap();
        assert_eq!(s, CacheStatus::Miss);
        let (_, s) = cache.get_or_compute(50, compute(50)).await.unwrap();
        assert_eq!(s, CacheStatus::Hit);
        let (r, s) = cache.get_or_compute(60, compute(60)).await.unwrap();
        assert_eq!((r.limit, s), (60, CacheStatus::Miss));
        clock.advance(100);
        let (_, s) = cache.get_or_compute(60, compute(60)).await.unwrap();
        assert_eq!(s, CacheStatus::Miss);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failure_without_history_is_returned() {
        let cache = ResponseCache::new(100, 1_000, Arc::new(ManualClock::new(0)));
        let err = cache
            .get_or_compute(10, || async { Err(AggregateError::AllSourcesFailed(3)) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "all_sources_failed");
    }

    #[test]
    fn fetch_budget_covers_retries() {
        assert_eq!(fetch_budget(1_000, 2), Duration::from_millis(4_000));
    }
}
