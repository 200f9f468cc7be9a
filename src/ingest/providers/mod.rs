// src/ingest/providers/mod.rs
pub mod kalshi;
pub mod manifold;
pub mod polymarket;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::clock::SharedClock;
use crate::config::{AggregatorConfig, SourceSettings};
use crate::error::SourceError;
use crate::ingest::http::{RetryPolicy, UpstreamClient, UpstreamConfig};
use crate::ingest::types::DynAdapter;
use crate::snapshot::Source;

pub use kalshi::KalshiAdapter;
pub use manifold::ManifoldAdapter;
pub use polymarket::PolymarketAdapter;

/// Pull the record array out of a listing body: either a bare array or an
/// object holding the array under one of `keys`.
pub(crate) fn records_of(body: Value, keys: &[&str]) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => keys
            .iter()
            .find_map(|k| match obj.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| SourceError::rejected("malformed body")),
        _ => Err(SourceError::rejected("malformed body")),
    }
}

pub(crate) fn parse_fixture(body: &str) -> Result<Value, SourceError> {
    serde_json::from_str(body).map_err(|_| SourceError::rejected("malformed body"))
}

/// `{base}{path}` with form-encoded query pairs; upstream cursors and token
/// ids are opaque and may carry reserved characters.
pub(crate) fn endpoint(base: &str, path: &str, query: &[(&str, &str)]) -> Result<String, SourceError> {
    let mut url = reqwest::Url::parse(&format!("{base}{path}"))
        .map_err(|e| SourceError::rejected(format!("invalid endpoint: {e}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.into())
}

pub(crate) fn upstream_client(s: &SourceSettings) -> Result<UpstreamClient, SourceError> {
    UpstreamClient::new(UpstreamConfig {
        timeout: Duration::from_millis(s.timeout_ms),
        retry: RetryPolicy {
            max_retries: s.max_retries,
            ..RetryPolicy::default()
        },
        max_concurrency: s.max_concurrency,
    })
}

/// Build HTTP adapters for every enabled source in the config. `clock`
/// stamps records that carry no update time.
pub fn build_http_adapters(cfg: &AggregatorConfig, clock: &SharedClock) -> anyhow::Result<Vec<DynAdapter>> {
    let mut out: Vec<DynAdapter> = Vec::new();
    for source in Source::ALL {
        let s = cfg.source(source);
        if !s.enabled {
            tracing::info!(source = source.as_str(), "source disabled by config");
            continue;
        }
        let client = upstream_client(s)?;
        let adapter: DynAdapter = match source {
            Source::Kalshi => Arc::new(
                KalshiAdapter::from_url(&s.base_url, client).with_clock(Arc::clone(clock)),
            ),
            Source::Manifold => Arc::new(
                ManifoldAdapter::from_url(&s.base_url, client).with_clock(Arc::clone(clock)),
            ),
            Source::Polymarket => Arc::new(
                PolymarketAdapter::from_urls(
                    &s.base_url,
                    s.aux_url.as_deref().unwrap_or(polymarket::DEFAULT_CLOB_URL),
                    client,
                )
                .with_clock(Arc::clone(clock)),
            ),
        };
        out.push(adapter);
    }
    Ok(out)
}
