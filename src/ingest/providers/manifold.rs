// src/ingest/providers/manifold.rs
use async_trait::async_trait;
use metrics::{counter, histogram};

use crate::clock::{self, SharedClock};
use crate::error::SourceError;
use crate::ingest::http::UpstreamClient;
use crate::ingest::providers::{endpoint, parse_fixture, records_of};
use crate::ingest::schema::{PriceRule, RecordSchema, UrlRule};
use crate::ingest::types::SourceAdapter;
use crate::ingest::{dedup_by_key, partition_records};
use crate::snapshot::{Snapshot, Source};

pub const DEFAULT_BASE_URL: &str = "https://api.manifold.markets";

pub const SCHEMA: RecordSchema = RecordSchema {
    source: Source::Manifold,
    id: &["id"],
    title: &["question"],
    price: &[PriceRule::Probability("probability"), PriceRule::Probability("p")],
    updated_at: &["lastUpdatedTime", "lastBetTime", "createdTime"],
    expires_at: &["closeTime"],
    url: &[
        UrlRule::Field("url"),
        UrlRule::Template {
            field: "slug",
            prefix: "https://manifold.markets/market/",
        },
    ],
    category: &["category"],
    tags: &["groupSlugs", "tags"],
    description: &["textDescription"],
};

enum Mode {
    Fixture(String),
    Http { base_url: String, client: UpstreamClient },
}

/// Manifold play-money markets; binary contracts only.
pub struct ManifoldAdapter {
    mode: Mode,
    clock: SharedClock,
}

impl ManifoldAdapter {
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
}

#[async_trait]
impl SourceAdapter for ManifoldAdapter {
    fn source(&self) -> Source {
        Source::Manifold
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<Snapshot>, SourceError> {
        let body = match &self.mode {
            Mode::Fixture(s) => parse_fixture(s)?,
            Mode::Http { base_url, client } => {
                let limit = limit.to_string();
                let url = endpoint(
                    base_url,
                    "/v0/search-markets",
                    &[
                        ("filter", "open"),
                        ("contractType", "BINARY"),
                        ("sort", "liquidity"),
                        ("limit", limit.as_str()),
                    ],
                )?;
                client.get_json(&url).await?
            }
        };
        let mut records = records_of(body, &["markets", "data"])?;
        records.truncate(limit);

        let t0 = std::time::Instant::now();
        let now = self.clock.now_ms();
        let binary = records.iter().filter(|r| {
            r.get("outcomeType")
                .and_then(|t| t.as_str())
                .map_or(true, |t| t.eq_ignore_ascii_case("BINARY"))
        });
        let out = dedup_by_key(partition_records(binary.map(|r| SCHEMA.extract(r, now))));

        histogram!("ingest_parse_ms", "source" => "manifold")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total", "source" => "manifold").increment(out.len() as u64);
        Ok(out)
    }
}
