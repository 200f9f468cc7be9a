// tests/source_cache.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockAdapter;
use prediction_aggregator::cache::SourceCache;
use prediction_aggregator::clock::ManualClock;
use prediction_aggregator::Source;

fn cache_over(adapter: &Arc<MockAdapter>, clock: &Arc<ManualClock>, ttl_ms: u64) -> Arc<SourceCache> {
    Arc::new(SourceCache::new(
        adapter.clone(),
        ttl_ms,
        Duration::from_secs(2),
        clock.clone(),
    ))
}

#[tokio::test]
async fn concurrent_misses_trigger_one_upstream_call() {
    let adapter = Arc::new(MockAdapter::new(Source::Kalshi, &["A?", "B?"]).delayed(50));
    let clock = Arc::new(ManualClock::new(0));
    let cache = cache_over(&adapter, &clock, 1_000);

    let (a, b) = tokio::join!(cache.get(10), cache.get(10));
    assert_eq!(adapter.calls(), 1);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.snapshots, b.snapshots);
    assert_eq!(a.snapshots.len(), 2);
    assert!(!a.from_cache || !b.from_cache, "exactly one caller led the fetch");
}

#[tokio::test]
async fn many_spawned_callers_still_share_one_fetch() {
    let adapter = Arc::new(MockAdapter::new(Source::Polymarket, &["A?"]).delayed(50));
    let clock = Arc::new(ManualClock::new(0));
    let cache = cache_over(&adapter, &clock, 1_000);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let c = cache.clone();
            tokio::spawn(async move { c.get(10).await })
        })
        .collect();
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn wider_request_joining_a_narrow_fetch_gets_its_full_limit() {
    let titles: Vec<String> = (0..60).map(|i| format!("Market {i}?")).collect();
    let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    let adapter = Arc::new(MockAdapter::new(Source::Kalshi, &refs).delayed(50));
    let clock = Arc::new(ManualClock::new(0));
    let cache = cache_over(&adapter, &clock, 1_000);

    let (small, big) = tokio::join!(cache.get(10), cache.get(50));
    assert_eq!(small.unwrap().snapshots.len(), 10);
    assert_eq!(big.unwrap().snapshots.len(), 50);
    assert_eq!(adapter.calls(), 2);

    // the wider entry now covers both limits
    assert_eq!(cache.get(50).await.unwrap().snapshots.len(), 50);
    assert_eq!(cache.get(10).await.unwrap().snapshots.len(), 10);
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn each_expiry_window_costs_one_call() {
    let adapter = Arc::new(MockAdapter::new(Source::Manifold, &["A?"]));
    let clock = Arc::new(ManualClock::new(0));
    let cache = cache_over(&adapter, &clock, 100);

    for _ in 0..5 {
        cache.get(10).await.unwrap();
    }
    assert_eq!(adapter.calls(), 1);

    clock.advance(150);
    for _ in 0..5 {
        cache.get(10).await.unwrap();
    }
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn expired_entry_is_served_degraded_when_refresh_fails() {
    let adapter = Arc::new(MockAdapter::new(Source::Kalshi, &["A?", "B?"]));
    let clock = Arc::new(ManualClock::new(0));
    let cache = cache_over(&adapter, &clock, 100);

    cache.get(10).await.unwrap();
    adapter.set_failing(true);
    clock.advance(1_000);

    let read = cache.get(10).await.unwrap();
    assert_eq!(read.snapshots.len(), 2);
    let err = read.degraded.expect("degraded marker");
    assert_eq!(err.kind(), "source_unavailable");

    adapter.set_failing(false);
    let fresh = cache.get(10).await.unwrap();
    assert!(fresh.degraded.is_none());
}

#[tokio::test]
async fn panicking_adapter_becomes_an_error_and_can_recover() {
    let adapter = Arc::new(MockAdapter::new(Source::Kalshi, &["A?"]).panicking());
    let clock = Arc::new(ManualClock::new(0));
    let cache = cache_over(&adapter, &clock, 100);

    assert!(cache.get(10).await.is_err());
    assert!(cache.get(10).await.is_err(), "a panic does not wedge the single-flight slot");
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let adapter = Arc::new(MockAdapter::new(Source::Kalshi, &["A?"]).delayed(500));
    let clock = Arc::new(ManualClock::new(0));
    let cache = SourceCache::new(adapter.clone(), 100, Duration::from_millis(20), clock);

    let err = cache.get(10).await.unwrap_err();
    assert_eq!(err.kind(), "source_timeout");
}
