//! Clusterer: groups snapshots from different venues that ask the same
//! question.
//!
//! Candidate pairs come from coarse title buckets rather than a full pairwise
//! scan; pairs at or above the length-dependent threshold are unioned in a
//! disjoint-set forest, and every resulting partition becomes a [`Cluster`]
//! (singletons included, nothing is dropped).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use metrics::histogram;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::matcher::{normalize_title, token_similarity};
use crate::snapshot::{Snapshot, Source};
use crate::theme::ThemeClassifier;

/// `(average token count upper bound, threshold)`, first match wins.
/// Short titles collide more easily and need a stricter score.
const THRESHOLD_STEPS: &[(f64, f64)] = &[(4.0, 0.90), (7.0, 0.80), (11.0, 0.72)];
const THRESHOLD_FLOOR: f64 = 0.65;

pub fn adaptive_threshold(avg_tokens: f64) -> f64 {
    THRESHOLD_STEPS
        .iter()
        .find(|(bound, _)| avg_tokens < *bound)
        .map(|(_, t)| *t)
        .unwrap_or(THRESHOLD_FLOOR)
}

/// 1–3 bucket keys: head pair, tail pair, and a middle pair for long titles.
pub fn bucket_keys(tokens: &[String]) -> Vec<String> {
    let n = tokens.len();
    match n {
        0 => Vec::new(),
        1 => vec![format!("h:{}", tokens[0])],
        _ => {
            let mut keys = vec![
                format!("h:{} {}", tokens[0], tokens[1]),
                format!("t:{} {}", tokens[n - 2], tokens[n - 1]),
            ];
            if n >= 6 {
                keys.push(format!("m:{} {}", tokens[n / 2 - 1], tokens[n / 2]));
            }
            keys
        }
    }
}

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns false when both were already in the same set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Short digest of the member keys; stable for a given member set.
    pub id: String,
    /// Longest member title.
    pub title: String,
    pub theme_key: String,
    pub platform_count: usize,
    /// Max minus min member price.
    pub price_spread: f64,
    /// Ordered by source, then id.
    pub members: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeGroup {
    pub key: String,
    pub label: String,
    pub cluster_ids: Vec<String>,
    pub cluster_count: usize,
    pub snapshot_count: usize,
    /// Clusters confirmed by more than one venue.
    pub multi_platform_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Clusterer {
    themes: ThemeClassifier,
}

impl Clusterer {
    pub fn new(themes: ThemeClassifier) -> Self {
        Self { themes }
    }

    pub fn themes(&self) -> &ThemeClassifier {
        &self.themes
    }

    /// Partition `snapshots` into clusters plus the theme groups over them.
    pub fn cluster(&self, snapshots: &[Snapshot]) -> (Vec<Cluster>, Vec<ThemeGroup>) {
        let t0 = Instant::now();
        let tokens: Vec<Vec<String>> = snapshots.iter().map(|s| normalize_title(&s.title)).collect();

        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, toks) in tokens.iter().enumerate() {
            for key in bucket_keys(toks) {
                buckets.entry(key).or_default().push(i);
            }
        }

        let mut uf = UnionFind::new(snapshots.len());
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut unions = 0usize;
        for members in buckets.values() {
            for (x, &i) in members.iter().enumerate() {
                for &j in &members[x + 1..] {
                    if snapshots[i].source == snapshots[j].source || !seen.insert((i.min(j), i.max(j))) {
                        continue;
                    }
                    let avg = (tokens[i].len() + tokens[j].len()) as f64 / 2.0;
                    if token_similarity(&tokens[i], &tokens[j]) >= adaptive_threshold(avg) && uf.union(i, j) {
                        unions += 1;
                    }
                }
            }
        }

        // partitions in first-seen order
        let mut slot: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..snapshots.len() {
            let root = uf.find(i);
            let g = *slot.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(i);
        }

        let mut clusters: Vec<Cluster> = groups.iter().map(|g| self.materialize(snapshots, g)).collect();
        clusters.sort_by(|a, b| {
            b.platform_count
                .cmp(&a.platform_count)
                .then(b.members.len().cmp(&a.members.len()))
        });
        let groups = self.theme_groups(&clusters);

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("cluster_duration_ms").record(ms);
        debug!(
            snapshots = snapshots.len(),
            buckets = buckets.len(),
            pairs = seen.len(),
            unions,
            clusters = clusters.len(),
            ms,
            "clustering done"
        );
        (clusters, groups)
    }

    fn materialize(&self, snapshots: &[Snapshot], idxs: &[usize]) -> Cluster {
        // idxs ascend, so strict `>` keeps the first-seen title on ties
        let mut canonical = &snapshots[idxs[0]];
        for &i in &idxs[1..] {
            if snapshots[i].title.chars().count() > canonical.title.chars().count() {
                canonical = &snapshots[i];
            }
        }

        let mut members: Vec<Snapshot> = idxs.iter().map(|&i| snapshots[i].clone()).collect();
        members.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.id.cmp(&b.id)));

        let platforms: BTreeSet<Source> = members.iter().map(|m| m.source).collect();
        let (lo, hi) = members
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), m| (lo.min(m.price), hi.max(m.price)));

        Cluster {
            id: cluster_id(&members),
            title: canonical.title.clone(),
            theme_key: self
                .themes
                .classify(&canonical.title, &canonical.auxiliary_text())
                .to_string(),
            platform_count: platforms.len(),
            price_spread: (hi - lo).max(0.0),
            members,
        }
    }

    /// Groups in taxonomy order; themes with no clusters are omitted.
    fn theme_groups(&self, clusters: &[Cluster]) -> Vec<ThemeGroup> {
        self.themes
            .keys()
            .into_iter()
            .filter_map(|key| {
                let hits: Vec<&Cluster> = clusters.iter().filter(|c| c.theme_key == key).collect();
                if hits.is_empty() {
                    return None;
                }
                Some(ThemeGroup {
                    key: key.to_string(),
                    label: self.themes.label(key),
                    cluster_ids: hits.iter().map(|c| c.id.clone()).collect(),
                    cluster_count: hits.len(),
                    snapshot_count: hits.iter().map(|c| c.members.len()).sum(),
                    multi_platform_count: hits.iter().filter(|c| c.platform_count > 1).count(),
                })
            })
            .collect()
    }
}

/// First 12 hex chars of SHA-256 over the sorted member keys.
fn cluster_id(members: &[Snapshot]) -> String {
    let mut keys: Vec<String> = members.iter().map(Snapshot::key).collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for k in &keys {
        hasher.update(k.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn snap(source: Source, id: &str, title: &str, price: f64) -> Snapshot {
        Snapshot::new(source, id, title, price, 0).unwrap()
    }

    #[test]
    fn threshold_steps() {
        assert_eq!(adaptive_threshold(2.0), 0.90);
        assert_eq!(adaptive_threshold(4.0), 0.80);
        assert_eq!(adaptive_threshold(6.5), 0.80);
        assert_eq!(adaptive_threshold(7.0), 0.72);
        assert_eq!(adaptive_threshold(11.0), 0.65);
        assert_eq!(adaptive_threshold(40.0), 0.65);
    }

    #[test]
    fn bucket_key_shapes() {
        assert!(bucket_keys(&[]).is_empty());
        assert_eq!(bucket_keys(&toks("bitcoin")), vec!["h:bitcoin"]);
        assert_eq!(bucket_keys(&toks("bitcoin hit")), vec!["h:bitcoin hit", "t:bitcoin hit"]);
        assert_eq!(
            bucket_keys(&toks("a b c d e f")),
            vec!["h:a b", "t:e f", "m:c d"]
        );
    }

    #[test]
    fn union_find_merges_transitively() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(0, 1));
        assert!(uf.union(3, 4));
        assert!(uf.union(1, 4));
        assert!(!uf.union(0, 3));
        assert_eq!(uf.find(0), uf.find(4));
        assert_ne!(uf.find(2), uf.find(0));
    }

    #[test]
    fn canonical_title_is_longest_and_spread_is_computed() {
        let c = Clusterer::default();
        let input = vec![
            snap(Source::Polymarket, "p1", "Will BTC hit $100K by 2025?", 0.40),
            snap(Source::Kalshi, "k1", "Will Bitcoin hit 100k in 2025?", 0.46),
        ];
        let (clusters, groups) = c.cluster(&input);
        assert_eq!(clusters.len(), 1);
        let cl = &clusters[0];
        assert_eq!(cl.title, "Will Bitcoin hit 100k in 2025?");
        assert_eq!(cl.platform_count, 2);
        assert!((cl.price_spread - 0.06).abs() < 1e-9);
        assert_eq!(cl.members[0].source, Source::Kalshi);
        assert_eq!(cl.theme_key, "crypto");
        assert_eq!(cl.id.len(), 12);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "crypto");
        assert_eq!(groups[0].snapshot_count, 2);
        assert_eq!(groups[0].multi_platform_count, 1);
        assert_eq!(groups[0].label, "Crypto");
    }

    #[test]
    fn same_source_duplicates_stay_apart() {
        let c = Clusterer::default();
        let input = vec![
            snap(Source::Manifold, "a", "Will Bitcoin hit 100k in 2025?", 0.5),
            snap(Source::Manifold, "b", "Will Bitcoin hit 100k in 2025?", 0.5),
        ];
        let (clusters, _) = c.cluster(&input);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.members.len() == 1));
    }

    #[test]
    fn id_depends_only_on_members() {
        let a = snap(Source::Kalshi, "k", "x", 0.1);
        let b = snap(Source::Polymarket, "p", "y", 0.2);
        assert_eq!(cluster_id(&[a.clone(), b.clone()]), cluster_id(&[b, a]));
    }

    #[test]
    fn empty_input() {
        let (clusters, groups) = Clusterer::default().cluster(&[]);
        assert!(clusters.is_empty());
        assert!(groups.is_empty());
    }
}
