// src/config/aggregator.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::ingest::providers::{kalshi, manifold, polymarket};
use crate::snapshot::Source;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const ENV_RESPONSE_TTL_MS: &str = "AGG_RESPONSE_TTL_MS";
pub const ENV_STALE_CEILING_MS: &str = "AGG_STALE_CEILING_MS";
pub const ENV_DEFAULT_LIMIT: &str = "AGG_DEFAULT_LIMIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitBounds {
    pub min: usize,
    pub max: usize,
    pub default: usize,
}

impl Default for LimitBounds {
    fn default() -> Self {
        Self {
            min: 10,
            max: 500,
            default: 100,
        }
    }
}

impl LimitBounds {
    /// Out-of-range requests are clamped, never rejected.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default).clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Secondary endpoint (Polymarket CLOB for midpoint lookups).
    pub aux_url: Option<String>,
    pub ttl_ms: u64,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub max_concurrency: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            aux_url: None,
            ttl_ms: 30_000,
            timeout_ms: 8_000,
            max_retries: 2,
            max_concurrency: 4,
        }
    }
}

impl SourceSettings {
    fn for_source(source: Source) -> Self {
        let base = Self::default();
        match source {
            // Kalshi rate-limits aggressively; refresh less often.
            Source::Kalshi => Self {
                base_url: kalshi::DEFAULT_BASE_URL.to_string(),
                ttl_ms: 45_000,
                max_concurrency: 2,
                ..base
            },
            Source::Manifold => Self {
                base_url: manifold::DEFAULT_BASE_URL.to_string(),
                ttl_ms: 60_000,
                ..base
            },
            Source::Polymarket => Self {
                base_url: polymarket::DEFAULT_GAMMA_URL.to_string(),
                aux_url: Some(polymarket::DEFAULT_CLOB_URL.to_string()),
                ttl_ms: 20_000,
                max_concurrency: 5,
                ..base
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub limit: LimitBounds,
    pub response_ttl_ms: u64,
    /// Oldest top-level result that may still be served as stale fallback.
    pub stale_ceiling_ms: u64,
    pub kalshi: SourceSettings,
    pub manifold: SourceSettings,
    pub polymarket: SourceSettings,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            limit: LimitBounds::default(),
            response_ttl_ms: 15_000,
            stale_ceiling_ms: 300_000,
            kalshi: SourceSettings::for_source(Source::Kalshi),
            manifold: SourceSettings::for_source(Source::Manifold),
            polymarket: SourceSettings::for_source(Source::Polymarket),
        }
    }
}

impl AggregatorConfig {
    pub fn source(&self, source: Source) -> &SourceSettings {
        match source {
            Source::Kalshi => &self.kalshi,
            Source::Manifold => &self.manifold,
            Source::Polymarket => &self.polymarket,
        }
    }

    fn source_mut(&mut self, source: Source) -> &mut SourceSettings {
        match source {
            Source::Kalshi => &mut self.kalshi,
            Source::Manifold => &mut self.manifold,
            Source::Polymarket => &mut self.polymarket,
        }
    }

    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, &ext)?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $AGGREGATOR_CONFIG_PATH
    /// 2) config/aggregator.toml
    /// 3) config/aggregator.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new("config/aggregator.toml").exists() {
            Self::load_from(Path::new("config/aggregator.toml"))?
        } else if Path::new("config/aggregator.json").exists() {
            Self::load_from(Path::new("config/aggregator.json"))?
        } else {
            Self::default()
        };
        Ok(cfg.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_u64(ENV_RESPONSE_TTL_MS) {
            self.response_ttl_ms = v;
        }
        if let Some(v) = env_u64(ENV_STALE_CEILING_MS) {
            self.stale_ceiling_ms = v;
        }
        if let Some(v) = env_u64(ENV_DEFAULT_LIMIT) {
            self.limit.default = v as usize;
        }
        self.sanitized()
    }

    /// Repair rather than reject: ordered limit bounds, non-zero TTLs,
    /// default endpoints for blank URLs.
    pub fn sanitized(mut self) -> Self {
        let l = &mut self.limit;
        l.min = l.min.max(1);
        if l.min > l.max {
            std::mem::swap(&mut l.min, &mut l.max);
        }
        l.default = l.default.clamp(l.min, l.max);

        if self.response_ttl_ms == 0 {
            self.response_ttl_ms = Self::default().response_ttl_ms;
        }
        self.stale_ceiling_ms = self.stale_ceiling_ms.max(self.response_ttl_ms);

        for source in Source::ALL {
            let fallback = SourceSettings::for_source(source);
            let s = self.source_mut(source);
            if s.base_url.trim().is_empty() {
                s.base_url = fallback.base_url;
            }
            if s.aux_url.is_none() {
                s.aux_url = fallback.aux_url;
            }
            if s.ttl_ms == 0 {
                s.ttl_ms = fallback.ttl_ms;
            }
            if s.timeout_ms == 0 {
                s.timeout_ms = fallback.timeout_ms;
            }
            s.max_concurrency = s.max_concurrency.max(1);
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AggregatorConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing aggregator config json");
    }
    if hint_ext == "toml" {
        return toml::from_str(s).context("parsing aggregator config toml");
    }
    // Unknown extension: try JSON, then TOML
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported aggregator config format: {e}"))
}
