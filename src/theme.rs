// src/theme.rs
//! Theme classifier: single-label keyword classification into an ordered
//! topic taxonomy.
//!
//! Single-word keywords match whole tokens of the lower-cased text (so "ai"
//! never fires inside "said"); keywords containing spaces or punctuation
//! ("white house", "s&p 500") match as literal substrings. The first theme in
//! declared order with any hit wins. Nothing matched → [`OTHER`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub const DEFAULT_THEMES_CONFIG_PATH: &str = "config/themes.toml";
pub const ENV_THEMES_CONFIG_PATH: &str = "THEMES_CONFIG_PATH";

/// Catch-all key; carries no keywords and is always last.
pub const OTHER: &str = "other";

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("tokenizer regex"));

/// Lower-cased word tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    RE_WORD
        .find_iter(&input.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn default_label(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct ThemesRoot {
    #[serde(default, rename = "theme")]
    pub themes: Vec<ThemeCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThemeCfg {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledTheme {
    key: String,
    label: String,
    keywords: Vec<String>,
    words: HashSet<String>,
    phrases: Vec<String>,
}

impl CompiledTheme {
    fn compile(key: &str, label: Option<&str>, keywords: &[String]) -> Self {
        let key = key.trim().to_lowercase();
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let (phrases, words): (Vec<String>, Vec<String>) = keywords
            .iter()
            .cloned()
            .partition(|k| k.chars().any(|c| !(c.is_alphanumeric() || c == '_')));
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_label(&key));
        Self {
            key,
            label,
            keywords,
            words: words.into_iter().collect(),
            phrases,
        }
    }

    fn hits(&self, tokens: &HashSet<String>, text: &str) -> bool {
        tokens.iter().any(|t| self.words.contains(t)) || self.phrases.iter().any(|p| text.contains(p))
    }
}

#[derive(Debug, Clone)]
pub struct ThemeClassifier {
    themes: Vec<CompiledTheme>,
}

impl Default for ThemeClassifier {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl ThemeClassifier {
    /// Built-in taxonomy, in priority order.
    pub fn default_seed() -> Self {
        let seed: &[(&str, &[&str])] = &[
            (
                "politics",
                &[
                    "election", "elections", "president", "presidential", "senate", "congress",
                    "governor", "democrat", "democrats", "republican", "republicans", "gop",
                    "trump", "biden", "harris", "vance", "newsom", "parliament", "prime minister",
                    "supreme court", "white house", "nominee", "primary", "impeachment", "mayor",
                ],
            ),
            (
                "crypto",
                &[
                    "bitcoin", "btc", "ethereum", "eth", "crypto", "cryptocurrency", "solana",
                    "xrp", "stablecoin", "coinbase", "binance", "memecoin", "nft", "blockchain",
                    "dogecoin",
                ],
            ),
            (
                "macro",
                &[
                    "federal reserve", "fed", "fomc", "interest rate", "rates", "inflation", "cpi",
                    "gdp", "recession", "unemployment", "payrolls", "tariff", "tariffs",
                    "treasury", "yields", "s&p 500", "nasdaq", "dow jones", "powell", "economy",
                    "deficit",
                ],
            ),
            (
                "geopolitics",
                &[
                    "war", "ukraine", "russia", "israel", "gaza", "iran", "china", "taiwan",
                    "nato", "ceasefire", "invasion", "sanctions", "putin", "zelensky", "hamas",
                    "north korea", "missile",
                ],
            ),
            (
                "tech",
                &[
                    "ai", "openai", "chatgpt", "gpt", "apple", "google", "microsoft", "nvidia",
                    "tesla", "iphone", "anthropic", "artificial intelligence", "semiconductor",
                    "tiktok", "spacex",
                ],
            ),
            (
                "sports",
                &[
                    "nba", "nfl", "mlb", "nhl", "world cup", "super bowl", "championship",
                    "playoffs", "premier league", "ufc", "olympics", "tennis", "golf", "f1",
                    "wimbledon", "mvp", "stanley cup", "world series", "champions league",
                ],
            ),
            (
                "entertainment",
                &[
                    "oscar", "oscars", "grammy", "grammys", "emmy", "movie", "film", "album",
                    "box office", "netflix", "spotify", "billboard", "taylor swift", "celebrity",
                    "eurovision",
                ],
            ),
            (
                "science",
                &[
                    "climate", "hurricane", "earthquake", "nasa", "vaccine", "pandemic", "covid",
                    "measles", "global warming", "asteroid", "mars", "weather", "hottest year",
                ],
            ),
        ];
        let themes = seed
            .iter()
            .map(|(key, kws)| {
                let kws: Vec<String> = kws.iter().map(|s| s.to_string()).collect();
                CompiledTheme::compile(key, None, &kws)
            })
            .collect();
        Self { themes }
    }

    /// Load from a TOML string:
    ///
    /// ```toml
    /// [[theme]]
    /// key = "crypto"
    /// keywords = ["bitcoin", "ethereum"]
    /// ```
    ///
    /// A `theme` keyed `other` is ignored; the catch-all is implicit. Repeated
    /// keys merge into the first occurrence: its position, the first non-empty
    /// label, and the union of keywords.
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: ThemesRoot = toml::from_str(toml_str)?;
        let mut merged: Vec<ThemeCfg> = Vec::with_capacity(cfg.themes.len());
        for t in cfg.themes {
            let key = t.key.trim().to_lowercase();
            if key.is_empty() || key == OTHER {
                continue;
            }
            match merged.iter_mut().find(|m| m.key == key) {
                Some(m) => {
                    warn!(theme = %key, "duplicate theme key merged");
                    let has_label = m.label.as_deref().is_some_and(|l| !l.trim().is_empty());
                    if !has_label {
                        m.label = t.label;
                    }
                    for kw in t.keywords {
                        if !m.keywords.contains(&kw) {
                            m.keywords.push(kw);
                        }
                    }
                }
                None => merged.push(ThemeCfg { key, ..t }),
            }
        }
        let themes: Vec<CompiledTheme> = merged
            .iter()
            .map(|t| CompiledTheme::compile(&t.key, t.label.as_deref(), &t.keywords))
            .collect();
        if themes.is_empty() {
            anyhow::bail!("theme config declares no themes");
        }
        Ok(Self { themes })
    }

    /// THEMES_CONFIG_PATH or "config/themes.toml"; the built-in seed when the
    /// file is absent or invalid.
    pub fn from_toml() -> Self {
        let path = std::env::var(ENV_THEMES_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_THEMES_CONFIG_PATH));
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default_seed();
        };
        match Self::from_toml_str(&content) {
            Ok(c) => {
                info!(path = %path.display(), themes = c.themes.len(), "theme taxonomy loaded");
                c
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid theme config; using built-in taxonomy");
                Self::default_seed()
            }
        }
    }

    /// Theme keys in priority order, ending with [`OTHER`].
    pub fn keys(&self) -> Vec<&str> {
        self.themes
            .iter()
            .map(|t| t.key.as_str())
            .chain(std::iter::once(OTHER))
            .collect()
    }

    /// Display label; unknown keys get a capitalized key.
    pub fn label(&self, key: &str) -> String {
        self.themes
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.label.clone())
            .unwrap_or_else(|| default_label(key))
    }

    /// Declared keywords of one theme (empty for unknown keys and `other`).
    pub fn keywords(&self, key: &str) -> &[String] {
        self.themes
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.keywords.as_slice())
            .unwrap_or(&[])
    }

    /// Total: always returns a declared key.
    pub fn classify(&self, title: &str, aux: &[&str]) -> &str {
        let mut text = title.to_lowercase();
        for a in aux.iter().filter(|a| !a.trim().is_empty()) {
            text.push(' ');
            text.push_str(&a.to_lowercase());
        }
        let tokens: HashSet<String> = tokenize(&text).into_iter().collect();
        self.themes
            .iter()
            .find(|t| t.hits(&tokens, &text))
            .map(|t| t.key.as_str())
            .unwrap_or(OTHER)
    }
}
