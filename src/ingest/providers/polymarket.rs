//! Polymarket: Gamma market listing, with CLOB midpoint lookups for markets
//! whose listing carries no usable price.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::future::join_all;
use metrics::{counter, histogram};
use serde_json::Value;

use crate::clock::{self, SharedClock};
use crate::error::SourceError;
use crate::ingest::http::{ConcurrencyGate, UpstreamClient};
use crate::ingest::providers::{endpoint, parse_fixture, records_of};
use crate::ingest::schema::{as_f64, price_from, PriceRule, RecordSchema, UrlRule};
use crate::ingest::types::SourceAdapter;
use crate::ingest::{dedup_by_key, partition_records};
use crate::snapshot::{Snapshot, Source};

pub const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
pub const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";

/// Field injected into a record after a successful CLOB lookup.
const CLOB_MIDPOINT: &str = "clobMidpoint";

const LISTING_PRICES: &[PriceRule] = &[
    PriceRule::FirstOfJsonArray("outcomePrices"),
    PriceRule::Probability("lastTradePrice"),
    PriceRule::Midpoint {
        bid: "bestBid",
        ask: "bestAsk",
        scale: 1.0,
    },
];

const ALL_PRICES: &[PriceRule] = &[
    PriceRule::FirstOfJsonArray("outcomePrices"),
    PriceRule::Probability("lastTradePrice"),
    PriceRule::Midpoint {
        bid: "bestBid",
        ask: "bestAsk",
        scale: 1.0,
    },
    PriceRule::Probability(CLOB_MIDPOINT),
];

pub const SCHEMA: RecordSchema = RecordSchema {
    source: Source::Polymarket,
    id: &["id", "conditionId", "condition_id"],
    title: &["question", "title"],
    price: ALL_PRICES,
    updated_at: &["updatedAt", "updated_at"],
    expires_at: &["endDate", "end_date_iso", "endDateIso"],
    url: &[UrlRule::Template {
        field: "slug",
        prefix: "https://polymarket.com/market/",
    }],
    category: &["category"],
    tags: &["tags"],
    description: &["description"],
};

enum Mode {
    Fixture {
        body: String,
        midpoints: HashMap<String, f64>,
    },
    Http {
        client: UpstreamClient,
        gamma_url: String,
        clob_url: String,
    },
}

pub struct PolymarketAdapter {
    mode: Mode,
    gate: ConcurrencyGate,
    clock: SharedClock,
}

impl PolymarketAdapter {
    pub fn from_urls(gamma_url: &str, clob_url: &str, client: UpstreamClient) -> Self {
        let gate = client.gate().clone();
        Self {
            mode: Mode::Http {
                client,
                gamma_url: gamma_url.trim_end_matches('/').to_string(),
                clob_url: clob_url.trim_end_matches('/').to_string(),
            },
            gate,
            clock: clock::system(),
        }
    }

    /// Offline mode: a listing body plus canned CLOB midpoints by token id.
    pub fn from_fixture_str(body: &str, midpoints: HashMap<String, f64>) -> Self {
        Self {
            mode: Mode::Fixture {
                body: body.to_string(),
                midpoints,
            },
            gate: ConcurrencyGate::new(4),
            clock: clock::system(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    async fn listing(&self, limit: usize) -> Result<Vec<Value>, SourceError> {
        let body = match &self.mode {
            Mode::Fixture { body, .. } => parse_fixture(body)?,
            Mode::Http {
                client, gamma_url, ..
            } => {
                let limit = limit.to_string();
                let url = endpoint(
                    gamma_url,
                    "/markets",
                    &[
                        ("active", "true"),
                        ("closed", "false"),
                        ("order", "volume24hr"),
                        ("ascending", "false"),
                        ("limit", limit.as_str()),
                    ],
                )?;
                client.get_json(&url).await?
            }
        };
        let mut records = records_of(body, &["markets", "data"])?;
        records.truncate(limit);
        Ok(records)
    }

    async fn midpoint(&self, token_id: &str) -> Result<f64, SourceError> {
        match &self.mode {
            Mode::Fixture { midpoints, .. } => midpoints
                .get(token_id)
                .copied()
                .ok_or_else(|| SourceError::rejected("HTTP 404")),
            Mode::Http {
                client, clob_url, ..
            } => {
                let url = endpoint(clob_url, "/midpoint", &[("token_id", token_id)])?;
                let v = client.get_json(&url).await?;
                v.get("mid")
                    .and_then(as_f64)
                    .ok_or_else(|| SourceError::rejected("malformed body"))
            }
        }
    }

    /// Per-instrument price lookups for listing records without a price,
    /// throttled through the gate. Failed lookups leave the record unpriced.
    async fn fill_midpoints(&self, records: &mut [Value]) {
        let pending: Vec<(usize, String)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| price_from(r, LISTING_PRICES).is_none())
            .filter_map(|(i, r)| yes_token_id(r).map(|t| (i, t)))
            .collect();
        if pending.is_empty() {
            return;
        }

        let lookups = pending.iter().map(|(_, token)| self.gate.run(self.midpoint(token)));
        let results = join_all(lookups).await;

        for ((idx, token), res) in pending.into_iter().zip(results) {
            match res.and_then(|r| r) {
                Ok(mid) => {
                    if let Some(obj) = records[idx].as_object_mut() {
                        obj.insert(CLOB_MIDPOINT.to_string(), Value::from(mid));
                    }
                }
                Err(e) => {
                    tracing::debug!(source = "polymarket", %token, error = %e, "midpoint lookup failed");
                }
            }
        }
    }
}

/// First CLOB token id (the "yes" outcome); stored as a JSON-encoded array.
fn yes_token_id(rec: &Value) -> Option<String> {
    let raw = rec.get("clobTokenIds")?;
    let ids: Vec<String> = match raw {
        Value::String(s) => serde_json::from_str(s).ok()?,
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => return None,
    };
    ids.into_iter().next().filter(|t| !t.is_empty())
}

#[async_trait]
impl SourceAdapter for PolymarketAdapter {
    fn source(&self) -> Source {
        Source::Polymarket
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Snapshot>, SourceError> {
        let mut records = self.listing(limit).await?;
        self.fill_midpoints(&mut records).await;

        let t0 = std::time::Instant::now();
        let now = self.clock.now_ms();
        let out = dedup_by_key(partition_records(
            records.iter().map(|r| SCHEMA.extract(r, now)),
        ));

        histogram!("ingest_parse_ms", "source" => "polymarket")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total", "source" => "polymarket").increment(out.len() as u64);
        Ok(out)
    }
}
