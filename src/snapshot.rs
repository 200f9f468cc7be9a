//! Canonical listing shape shared by every source.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed set of upstream venues. Declared in name order so the derived
/// `Ord` sorts members by source name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Kalshi,
    Manifold,
    Polymarket,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Kalshi, Source::Manifold, Source::Polymarket];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Kalshi => "kalshi",
            Source::Manifold => "manifold",
            Source::Polymarket => "polymarket",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listing from one source at fetch time. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub source: Source,
    pub id: String,
    pub title: String,
    /// Probability of the "yes" outcome, always within `[0, 1]`.
    pub price: f64,
    /// Epoch milliseconds.
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Snapshot {
    /// Build a snapshot with the required fields; `None` if the title is
    /// blank or the price is not a finite probability.
    pub fn new(
        source: Source,
        id: impl Into<String>,
        title: impl Into<String>,
        price: f64,
        updated_at: u64,
    ) -> Option<Self> {
        let title = title.into();
        if title.trim().is_empty() || !is_probability(price) {
            return None;
        }
        Some(Self {
            source,
            id: id.into(),
            title,
            price,
            updated_at,
            expires_at: None,
            url: None,
            category: None,
            tags: BTreeSet::new(),
            description: None,
        })
    }

    pub fn with_expires_at(mut self, ms: Option<u64>) -> Self {
        self.expires_at = ms;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.trim().is_empty())
            .collect();
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// `source:id`, unique within one aggregation result.
    pub fn key(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }

    /// Title plus the optional metadata, for classification.
    pub fn auxiliary_text(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(2 + self.tags.len());
        if let Some(c) = self.category.as_deref() {
            out.push(c);
        }
        out.extend(self.tags.iter().map(String::as_str));
        if let Some(d) = self.description.as_deref() {
            out.push(d);
        }
        out
    }
}

pub fn is_probability(p: f64) -> bool {
    p.is_finite() && (0.0..=1.0).contains(&p)
}
