// tests/ingest_normalize.rs
use prediction_aggregator::error::NormalizationSkipped;
use prediction_aggregator::ingest::{dedup_by_key, normalize_text, partition_records};
use prediction_aggregator::{Snapshot, Source};

fn snap(source: Source, id: &str, title: &str) -> Snapshot {
    Snapshot::new(source, id, title, 0.5, 0).unwrap()
}

#[test]
fn empty_is_ok() {
    assert_eq!(normalize_text(""), "");
}

#[test]
fn strips_html_and_unescapes() {
    let s = "<p>Will&nbsp;<b>Bitcoin</b> hit &ldquo;100k&rdquo;?</p>";
    assert_eq!(normalize_text(s), r#"Will Bitcoin hit "100k"?"#);
}

#[test]
fn folds_whitespace_and_nbsp() {
    let s = "A\u{00A0}\n\tB   C";
    assert_eq!(normalize_text(s), "A B C");
}

#[test]
fn length_cap_applies() {
    let s = "x".repeat(2_000);
    assert_eq!(normalize_text(&s).chars().count(), 1_000);
}

#[test]
fn partition_keeps_order_of_survivors() {
    let kept = partition_records(vec![
        Ok(snap(Source::Manifold, "a", "A?")),
        Err(NormalizationSkipped::new(Source::Manifold, Some("b".into()), "probability out of range")),
        Ok(snap(Source::Manifold, "c", "C?")),
        Err(NormalizationSkipped::new(Source::Manifold, None, "missing title")),
    ]);
    let ids: Vec<_> = kept.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
}

#[test]
fn dedup_is_per_source() {
    let out = dedup_by_key(vec![
        snap(Source::Kalshi, "X", "First?"),
        snap(Source::Polymarket, "X", "Same id, other venue?"),
        snap(Source::Kalshi, "X", "Repeat?"),
    ]);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].title, "First?");
    assert_eq!(out[1].source, Source::Polymarket);
}
