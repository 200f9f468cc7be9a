//! # Matcher
//! Pairwise "same real-world question" similarity between two snapshots.
//!
//! Formula v1 (cluster thresholds are tuned against exactly this):
//!
//! 1. Titles are normalized into content tokens: HTML-decoded, lower-cased,
//!    thousands separators dropped, `$ € £ ? !` stripped, punctuation turned
//!    into spaces, magnitude suffixes expanded (`100k` → `100000`), aliases
//!    folded (`btc` → `bitcoin`) and stop words removed.
//! 2. `inter = min(matched(A→B), matched(B→A))`, where a token matches if an
//!    identical token exists on the other side or, for non-numeric tokens of
//!    5+ chars, one with Jaro–Winkler ≥ 0.93 (plurals, typos).
//! 3. `dice = 2·inter / (|A| + |B|)`, `containment = inter / min(|A|, |B|)`.
//! 4. `score = 0.75·dice + 0.25·containment`, halved when both titles carry
//!    numbers but share none (different strike, different year).
//!
//! Same-source pairs and empty token sets score 0. Pure and symmetric.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::snapshot::Snapshot;

pub const FORMULA_VERSION: &str = "v1";

const DICE_WEIGHT: f64 = 0.75;
const CONTAINMENT_WEIGHT: f64 = 0.25;
const NUMERIC_MISMATCH_FACTOR: f64 = 0.5;
const FUZZY_MIN_LEN: usize = 5;
const FUZZY_MIN_JARO_WINKLER: f64 = 0.93;

static STOP_WORDS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "will", "be", "is", "are", "was", "by", "in", "on", "of", "to", "for",
        "at", "this", "that", "before", "after", "end", "or", "and", "with", "as", "does", "do",
        "than", "it", "its", "any", "market", "yes", "no",
    ]
    .into_iter()
    .collect()
});

/// Single-token aliases folded onto one canonical spelling.
static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("btc", "bitcoin"),
        ("xbt", "bitcoin"),
        ("eth", "ethereum"),
        ("ether", "ethereum"),
        ("sol", "solana"),
        ("doge", "dogecoin"),
        ("fomc", "fed"),
        ("potus", "president"),
        ("us", "usa"),
        ("u", "usa"),
        ("america", "usa"),
        ("uk", "britain"),
        ("gop", "republican"),
        ("republicans", "republican"),
        ("dems", "democrat"),
        ("democrats", "democrat"),
        ("democratic", "democrat"),
        ("elected", "win"),
        ("wins", "win"),
        ("winner", "win"),
        ("reach", "hit"),
        ("hits", "hit"),
        ("above", "over"),
        ("exceed", "over"),
        ("jan", "january"),
        ("feb", "february"),
        ("mar", "march"),
        ("apr", "april"),
        ("jun", "june"),
        ("jul", "july"),
        ("aug", "august"),
        ("sep", "september"),
        ("sept", "september"),
        ("oct", "october"),
        ("nov", "november"),
        ("dec", "december"),
    ]
    .into_iter()
    .collect()
});

static RE_THOUSANDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d),(\d{3})").expect("thousands regex"));
static RE_MAGNITUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)([kmb])$").expect("magnitude regex"));

/// Lower-cased content tokens of a title, in title order.
pub fn normalize_title(title: &str) -> Vec<String> {
    let decoded = html_escape::decode_html_entities(title).to_lowercase();
    // "100,000" twice so overlapping groups ("1,000,000") collapse fully
    let joined = RE_THOUSANDS.replace_all(&decoded, "$1$2");
    let joined = RE_THOUSANDS.replace_all(&joined, "$1$2");

    let cleaned: String = joined
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '?' | '!'))
        .map(|c| {
            if c.is_alphanumeric() || c == '.' {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .map(|t| t.trim_matches('.'))
        // dots only carry meaning inside numbers; "u.s" is an abbreviation
        .map(|t| {
            if t.chars().any(|c| c.is_ascii_digit()) {
                t.to_string()
            } else {
                t.replace('.', "")
            }
        })
        .filter(|t| !t.is_empty())
        .map(|t| expand_magnitude(&t))
        .map(|t| ALIASES.get(t.as_str()).map(|a| a.to_string()).unwrap_or(t))
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .collect()
}

/// `100k` → `100000`, `1.5m` → `1500000`; anything else unchanged.
fn expand_magnitude(tok: &str) -> String {
    let Some(caps) = RE_MAGNITUDE.captures(tok) else {
        return tok.to_string();
    };
    let base: f64 = match caps[1].parse() {
        Ok(v) => v,
        Err(_) => return tok.to_string(),
    };
    let mult = match &caps[2] {
        "k" => 1e3,
        "m" => 1e6,
        _ => 1e9,
    };
    format!("{}", (base * mult).round() as u64)
}

fn is_numeric(tok: &str) -> bool {
    tok.chars().next().is_some_and(|c| c.is_ascii_digit())
        && tok.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn tokens_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    a.len() >= FUZZY_MIN_LEN
        && b.len() >= FUZZY_MIN_LEN
        && !is_numeric(a)
        && !is_numeric(b)
        && strsim::jaro_winkler(a, b) >= FUZZY_MIN_JARO_WINKLER
}

fn matched_count(from: &BTreeSet<&str>, to: &BTreeSet<&str>) -> usize {
    from.iter()
        .filter(|t| to.contains(*t) || to.iter().any(|u| tokens_match(t, u)))
        .count()
}

/// Similarity of two already-normalized token lists.
pub fn token_similarity(a: &[String], b: &[String]) -> f64 {
    let sa: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let sb: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }

    let inter = matched_count(&sa, &sb).min(matched_count(&sb, &sa)) as f64;
    let (la, lb) = (sa.len() as f64, sb.len() as f64);
    let dice = 2.0 * inter / (la + lb);
    let containment = inter / la.min(lb);
    let mut score = DICE_WEIGHT * dice + CONTAINMENT_WEIGHT * containment;

    let na: BTreeSet<&str> = sa.iter().copied().filter(|t| is_numeric(t)).collect();
    let nb: BTreeSet<&str> = sb.iter().copied().filter(|t| is_numeric(t)).collect();
    if !na.is_empty() && !nb.is_empty() && na.is_disjoint(&nb) {
        score *= NUMERIC_MISMATCH_FACTOR;
    }
    score.clamp(0.0, 1.0)
}

/// Symmetric similarity in `[0, 1]`; same-source pairs are never compared.
pub fn similarity(a: &Snapshot, b: &Snapshot) -> f64 {
    if a.source == b.source {
        return 0.0;
    }
    token_similarity(&normalize_title(&a.title), &normalize_title(&b.title))
}
