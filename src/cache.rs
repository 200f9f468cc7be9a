//! Per-source snapshot cache.
//!
//! Each source gets its own TTL. A miss triggers at most one upstream fetch
//! no matter how many callers arrive during it (single-flight); when that
//! fetch fails, the last good list is served as degraded rather than failing.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use metrics::counter;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::SourceError;
use crate::ingest::types::DynAdapter;
use crate::singleflight::{Role, SingleFlight};
use crate::snapshot::{Snapshot, Source};

#[derive(Debug, Clone)]
struct Entry {
    snapshots: Arc<Vec<Snapshot>>,
    /// Limit the list was fetched with; smaller requests are served from it.
    fetched_limit: usize,
    fetched_at: u64,
    expires_at: u64,
}

/// What one cache read produced for the aggregator.
#[derive(Debug, Clone)]
pub struct SourceRead {
    pub snapshots: Vec<Snapshot>,
    pub fetched_at: u64,
    /// Served without an upstream call.
    pub from_cache: bool,
    /// Set when the upstream call failed and an older list was served.
    pub degraded: Option<SourceError>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

pub struct SourceCache {
    adapter: DynAdapter,
    ttl_ms: u64,
    fetch_timeout: Duration,
    clock: SharedClock,
    entry: Arc<Mutex<Option<Entry>>>,
    flight: SingleFlight<(), Result<Entry, SourceError>>,
}

impl SourceCache {
    pub fn new(adapter: DynAdapter, ttl_ms: u64, fetch_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            adapter,
            ttl_ms,
            fetch_timeout,
            clock,
            entry: Arc::new(Mutex::new(None)),
            flight: SingleFlight::new(),
        }
    }

    pub fn source(&self) -> Source {
        self.adapter.source()
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    fn current(&self) -> Option<Entry> {
        lock(&self.entry).clone()
    }

    /// Up to `limit` snapshots for this source, from cache when fresh.
    pub async fn get(&self, limit: usize) -> Result<SourceRead, SourceError> {
        let source = self.source();
        let now = self.clock.now_ms();
        if let Some(e) = self.current() {
            if now < e.expires_at && e.fetched_limit >= limit {
                counter!("source_cache_hits_total", "source" => source.as_str()).increment(1);
                return Ok(read(&e, limit, true, None));
            }
        }

        loop {
            let (res, role) = self.flight.run((), || self.refresh(limit)).await;
            return match res {
                // joined a narrower fetch; its handle has settled, so go again
                Ok(e) if e.fetched_limit < limit => {
                    debug!(%source, joined = e.fetched_limit, limit, "joined fetch too small, refetching");
                    continue;
                }
                Ok(e) => Ok(read(&e, limit, role == Role::Joiner, None)),
                Err(err) => match self.current() {
                    Some(prev) => {
                        warn!(%source, error = %err, age_ms = now.saturating_sub(prev.fetched_at), "serving previous snapshots");
                        Ok(read(&prev, limit, true, Some(err)))
                    }
                    None => Err(err),
                },
            };
        }
    }

    /// The leader's upstream call. Stores the entry on success; adapter panics
    /// are turned into errors so they never poison the shared handle.
    fn refresh(
        &self,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Entry, SourceError>> + Send + 'static {
        let adapter = Arc::clone(&self.adapter);
        let clock = Arc::clone(&self.clock);
        let slot = Arc::clone(&self.entry);
        let ttl_ms = self.ttl_ms;
        let timeout = self.fetch_timeout;
        async move {
            let source = adapter.source();
            let call = AssertUnwindSafe(adapter.fetch(limit)).catch_unwind();
            let res = match tokio::time::timeout(timeout, call).await {
                Err(_) => Err(SourceError::Timeout(timeout)),
                Ok(Err(_)) => Err(SourceError::rejected("adapter panicked")),
                Ok(Ok(r)) => r,
            };
            match res {
                Ok(snapshots) => {
                    let now = clock.now_ms();
                    let entry = Entry {
                        snapshots: Arc::new(snapshots),
                        fetched_limit: limit,
                        fetched_at: now,
                        expires_at: now.saturating_add(ttl_ms),
                    };
                    *lock(&slot) = Some(entry.clone());
                    counter!("source_fetch_total", "source" => source.as_str(), "outcome" => "ok")
                        .increment(1);
                    debug!(%source, count = entry.snapshots.len(), limit, "source refreshed");
                    Ok(entry)
                }
                Err(e) => {
                    counter!("source_fetch_total", "source" => source.as_str(), "outcome" => "error")
                        .increment(1);
                    warn!(%source, kind = e.kind(), error = %e, "source fetch failed");
                    Err(e)
                }
            }
        }
    }
}

fn read(e: &Entry, limit: usize, from_cache: bool, degraded: Option<SourceError>) -> SourceRead {
    SourceRead {
        snapshots: e.snapshots.iter().take(limit).cloned().collect(),
        fetched_at: e.fetched_at,
        from_cache,
        degraded,
    }
}
