// src/ingest/providers/kalshi.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;

use crate::clock::{self, SharedClock};
use crate::error::SourceError;
use crate::ingest::http::UpstreamClient;
use crate::ingest::providers::{endpoint, parse_fixture, records_of};
use crate::ingest::schema::{PriceRule, RecordSchema, UrlRule};
use crate::ingest::types::SourceAdapter;
use crate::ingest::{dedup_by_key, partition_records};
use crate::snapshot::{Snapshot, Source};

pub const DEFAULT_BASE_URL: &str = "https://api.elections.kalshi.com";

/// Kalshi caps one page at 1000; smaller pages keep responses light.
const PAGE_SIZE: usize = 200;
const MAX_PAGES: usize = 5;

/// Prices are quoted in cents; newer payloads add `*_dollars` strings.
pub const SCHEMA: RecordSchema = RecordSchema {
    source: Source::Kalshi,
    id: &["ticker", "market_ticker"],
    title: &["title", "subtitle"],
    price: &[
        PriceRule::Midpoint {
            bid: "yes_bid",
            ask: "yes_ask",
            scale: 100.0,
        },
        PriceRule::Midpoint {
            bid: "yes_bid_dollars",
            ask: "yes_ask_dollars",
            scale: 1.0,
        },
        PriceRule::Percent("last_price"),
        PriceRule::Probability("last_price_dollars"),
    ],
    updated_at: &["updated_time", "last_updated_ts"],
    expires_at: &["close_time", "expiration_time", "expected_expiration_time"],
    url: &[UrlRule::Template {
        field: "event_ticker",
        prefix: "https://kalshi.com/markets/",
    }],
    category: &["category"],
    tags: &["tags"],
    description: &["rules_primary"],
};

enum Mode {
    Fixture(String),
    Http { base_url: String, client: UpstreamClient },
}

pub struct KalshiAdapter {
    mode: Mode,
    clock: SharedClock,
}

impl KalshiAdapter {
    pub fn from_url(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            mode: Mode::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                client,
            },
            clock: clock::system(),
        }
    }

    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            clock: clock::system(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Cursor pagination until `limit` records or the cursor runs out.
    async fn fetch_pages(
        base_url: &str,
        client: &UpstreamClient,
        limit: usize,
    ) -> Result<Vec<Value>, SourceError> {
        let mut out = Vec::with_capacity(limit);
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = PAGE_SIZE.min(limit - out.len()).to_string();
            let mut query = vec![("status", "open"), ("limit", page.as_str())];
            if let Some(c) = &cursor {
                query.push(("cursor", c.as_str()));
            }
            let url = endpoint(base_url, "/trade-api/v2/markets", &query)?;
            let body = client.get_json(&url).await?;
            cursor = body
                .get("cursor")
                .and_then(|c| c.as_str().map(str::to_string))
                .filter(|c| !c.is_empty());
            out.extend(records_of(body, &["markets"])?);
            if out.len() >= limit || cursor.is_none() {
                break;
            }
        }
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for KalshiAdapter {
    fn source(&self) -> Source {
        Source::Kalshi
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Snapshot>, SourceError> {
        let records = match &self.mode {
            Mode::Fixture(s) => {
                let mut r = records_of(parse_fixture(s)?, &["markets"])?;
                r.truncate(limit);
                r
            }
            Mode::Http { base_url, client } => Self::fetch_pages(base_url, client, limit).await?,
        };

        let t0 = std::time::Instant::now();
        let now = self.clock.now_ms();
        let out = dedup_by_key(partition_records(
            records.iter().map(|r| SCHEMA.extract(r, now)),
        ));

        histogram!("ingest_parse_ms", "source" => "kalshi")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total", "source" => "kalshi").increment(out.len() as u64);
        Ok(out)
    }
}
