//! Declarative record normalization.
//!
//! Upstream schemas drift, so each adapter describes its records as a
//! prioritized list of candidate fields per canonical attribute. Extraction
//! walks each list in order and falls through to the next candidate; a
//! record missing a required attribute is rejected, never defaulted.

use serde_json::Value;

use crate::error::NormalizationSkipped;
use crate::ingest::normalize_text;
use crate::snapshot::{is_probability, Snapshot, Source};

/// Epoch values below this are seconds, at or above it milliseconds.
const MS_CUTOFF: f64 = 1e12;

/// How one candidate field encodes the "yes" probability.
#[derive(Debug, Clone, Copy)]
pub enum PriceRule {
    /// Already a probability in `[0, 1]`.
    Probability(&'static str),
    /// 0–100 scale (percent or cents).
    Percent(&'static str),
    /// Midpoint of a two-sided book on the given scale. Needs a real quote
    /// on both sides: bid above zero, ask below full scale, ask ≥ bid.
    Midpoint {
        bid: &'static str,
        ask: &'static str,
        scale: f64,
    },
    /// JSON-encoded array (or real array) whose first element is the price.
    FirstOfJsonArray(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub enum UrlRule {
    Field(&'static str),
    /// `prefix` + field value.
    Template {
        field: &'static str,
        prefix: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub source: Source,
    pub id: &'static [&'static str],
    pub title: &'static [&'static str],
    pub price: &'static [PriceRule],
    pub updated_at: &'static [&'static str],
    pub expires_at: &'static [&'static str],
    pub url: &'static [UrlRule],
    pub category: &'static [&'static str],
    pub tags: &'static [&'static str],
    pub description: &'static [&'static str],
}

impl RecordSchema {
    /// Normalize one upstream record. `now_ms` stands in for a missing
    /// update timestamp (the record was live at fetch time).
    pub fn extract(&self, rec: &Value, now_ms: u64) -> Result<Snapshot, NormalizationSkipped> {
        let id = first_value(rec, self.id).and_then(as_string);
        let skip = |reason| NormalizationSkipped::new(self.source, id.clone(), reason);

        let Some(id_str) = id.clone() else {
            return Err(skip("missing id"));
        };
        let title = first_value(rec, self.title)
            .and_then(as_string)
            .map(|t| normalize_text(&t))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| skip("missing title"))?;
        let price = price_from(rec, self.price).ok_or_else(|| skip("no normalizable price"))?;
        let updated_at = first_value(rec, self.updated_at)
            .and_then(timestamp_ms)
            .unwrap_or(now_ms);

        let snap = Snapshot::new(self.source, id_str, title, price, updated_at)
            .ok_or_else(|| skip("invariant violation"))?
            .with_expires_at(first_value(rec, self.expires_at).and_then(timestamp_ms))
            .with_url(url_from(rec, self.url))
            .with_category(
                first_value(rec, self.category)
                    .and_then(as_string)
                    .filter(|c| !c.trim().is_empty()),
            )
            .with_tags(first_value(rec, self.tags).map(tags_from).unwrap_or_default())
            .with_description(
                first_value(rec, self.description)
                    .and_then(as_string)
                    .map(|d| normalize_text(&d))
                    .filter(|d| !d.is_empty()),
            );
        Ok(snap)
    }
}

/// First candidate field that is present, non-null and not an empty string.
pub fn first_value<'a>(rec: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|f| match rec.get(*f) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v),
    })
}

/// JSON number or numeric string.
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

pub fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Scale a raw value into a probability, rejecting anything outside `[0, 1]`.
pub fn normalize_price(raw: f64, scale: f64) -> Option<f64> {
    if scale <= 0.0 {
        return None;
    }
    let p = raw / scale;
    is_probability(p).then_some(p)
}

pub fn price_from(rec: &Value, rules: &[PriceRule]) -> Option<f64> {
    rules.iter().find_map(|rule| match *rule {
        PriceRule::Probability(f) => rec.get(f).and_then(as_f64).and_then(|x| normalize_price(x, 1.0)),
        PriceRule::Percent(f) => rec.get(f).and_then(as_f64).and_then(|x| normalize_price(x, 100.0)),
        PriceRule::Midpoint { bid, ask, scale } => {
            let b = rec.get(bid).and_then(as_f64)?;
            let a = rec.get(ask).and_then(as_f64)?;
            if b <= 0.0 || a >= scale || a < b {
                return None;
            }
            normalize_price((a + b) / 2.0, scale)
        }
        PriceRule::FirstOfJsonArray(f) => {
            let first = match rec.get(f)? {
                Value::Array(items) => items.first().and_then(as_f64),
                Value::String(s) => serde_json::from_str::<Vec<Value>>(s)
                    .ok()
                    .and_then(|items| items.first().and_then(as_f64)),
                _ => None,
            };
            first.and_then(|x| normalize_price(x, 1.0))
        }
    })
}

/// Epoch seconds, epoch milliseconds or RFC 3339 / plain date into epoch ms.
pub fn timestamp_ms(v: &Value) -> Option<u64> {
    if let Some(n) = as_f64(v) {
        if n < 0.0 {
            return None;
        }
        let ms = if n < MS_CUTOFF { n * 1000.0 } else { n };
        return Some(ms.round() as u64);
    }
    let s = v.as_str()?.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return u64::try_from(dt.timestamp_millis()).ok();
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| u64::try_from(dt.and_utc().timestamp_millis()).ok())
}

fn url_from(rec: &Value, rules: &[UrlRule]) -> Option<String> {
    rules.iter().find_map(|rule| match *rule {
        UrlRule::Field(f) => first_value(rec, &[f]).and_then(as_string),
        UrlRule::Template { field, prefix } => first_value(rec, &[field])
            .and_then(as_string)
            .map(|v| format!("{prefix}{}", v.to_ascii_lowercase())),
    })
}

/// Tags come as plain strings, comma lists, or objects with a label.
fn tags_from(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|it| match it {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(_) => first_value(it, &["label", "name", "slug"]).and_then(as_string),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(|t| t.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}
