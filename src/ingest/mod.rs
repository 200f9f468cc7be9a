// src/ingest/mod.rs
pub mod http;
pub mod providers;
pub mod schema;
pub mod types;

use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;

use crate::error::NormalizationSkipped;
use crate::snapshot::Snapshot;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "normalize_skipped_total",
            "Upstream records dropped during normalization."
        );
        describe_counter!(
            "ingest_records_total",
            "Snapshots produced by adapters after normalization."
        );
        describe_histogram!("ingest_parse_ms", "Adapter normalization time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, fold quotes and whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 1000 chars
    if out.chars().count() > 1000 {
        out = out.chars().take(1000).collect();
    }

    out
}

/// Split adapter output into kept snapshots, logging and counting the drops.
pub fn partition_records(
    results: impl IntoIterator<Item = Result<Snapshot, NormalizationSkipped>>,
) -> Vec<Snapshot> {
    ensure_metrics_described();
    let mut kept = Vec::new();
    for r in results {
        match r {
            Ok(s) => kept.push(s),
            Err(skip) => {
                tracing::debug!(
                    source = skip.source.as_str(),
                    record = skip.record_id.as_deref().unwrap_or("?"),
                    reason = skip.reason,
                    "record skipped"
                );
                counter!("normalize_skipped_total", "source" => skip.source.as_str())
                    .increment(1);
            }
        }
    }
    kept
}

/// Keep the first occurrence of each `(source, id)`.
pub fn dedup_by_key(snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut seen = std::collections::HashSet::new();
    snapshots
        .into_iter()
        .filter(|s| seen.insert((s.source, s.id.clone())))
        .collect()
}
