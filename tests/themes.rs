// tests/themes.rs
use prediction_aggregator::theme::{ThemeClassifier, ENV_THEMES_CONFIG_PATH, OTHER};
use prediction_aggregator::{Clusterer, Snapshot, Source};
use std::{env, fs};

#[test]
fn every_seed_keyword_classifies_to_its_own_theme() {
    let c = ThemeClassifier::default_seed();
    let keys = c.keys();
    assert_eq!(keys.last().copied(), Some(OTHER));
    for key in keys.iter().filter(|k| **k != OTHER) {
        assert!(!c.keywords(key).is_empty(), "{key} has no keywords");
        for kw in c.keywords(key) {
            assert_eq!(c.classify(kw, &[]), *key, "keyword {kw:?}");
            let in_title = format!("Will {kw} make headlines next week?");
            assert_eq!(c.classify(&in_title, &[]), *key, "title {in_title:?}");
        }
    }
}

#[test]
fn first_matching_theme_wins() {
    let c = ThemeClassifier::default_seed();
    // politics outranks crypto
    assert_eq!(c.classify("Will Trump mention Bitcoin in a speech?", &[]), "politics");
    // crypto outranks macro
    assert_eq!(c.classify("Will Bitcoin rally if the Fed cuts?", &[]), "crypto");
}

#[test]
fn other_only_when_nothing_matches() {
    let c = ThemeClassifier::default_seed();
    assert_eq!(c.classify("Will it snow in Paris on Christmas Day?", &[]), OTHER);
    assert_eq!(c.classify("", &[]), OTHER);
    // auxiliary text counts
    assert_eq!(c.classify("Will it snow in Paris on Christmas Day?", &["weather"]), "science");
    assert_eq!(c.classify("Who takes the title?", &["", "NBA"]), "sports");
}

#[test]
fn labels_default_to_capitalized_keys() {
    let c = ThemeClassifier::default_seed();
    assert_eq!(c.label("geopolitics"), "Geopolitics");
    assert_eq!(c.label(OTHER), "Other");
}

#[test]
fn toml_taxonomy_replaces_the_seed() {
    let c = ThemeClassifier::from_toml_str(
        r#"
[[theme]]
key = "weather"
label = "Weather & Climate"
keywords = ["snow", "heatwave", "polar vortex"]

[[theme]]
key = "other"
keywords = ["ignored"]
"#,
    )
    .unwrap();
    assert_eq!(c.keys(), vec!["weather", OTHER]);
    assert_eq!(c.label("weather"), "Weather & Climate");
    assert_eq!(c.classify("Will it snow in Paris?", &[]), "weather");
    assert_eq!(c.classify("Another polar vortex this winter?", &[]), "weather");
    assert_eq!(c.classify("Will Bitcoin hit 100k?", &[]), OTHER);
}

#[test]
fn repeated_theme_keys_merge_into_the_first() {
    let c = ThemeClassifier::from_toml_str(
        r#"
[[theme]]
key = "crypto"
keywords = ["bitcoin"]

[[theme]]
key = "weather"
keywords = ["snow"]

[[theme]]
key = " Crypto "
label = "Digital Assets"
keywords = ["ethereum", "bitcoin"]
"#,
    )
    .unwrap();
    assert_eq!(c.keys(), vec!["crypto", "weather", OTHER]);
    assert_eq!(c.label("crypto"), "Digital Assets");
    assert_eq!(c.keywords("crypto"), ["bitcoin", "ethereum"]);
    assert_eq!(c.classify("Will Ethereum flip Bitcoin?", &[]), "crypto");

    let snaps = vec![
        Snapshot::new(Source::Kalshi, "k1", "Will Bitcoin hit 100k?", 0.4, 1).unwrap(),
        Snapshot::new(Source::Manifold, "m1", "Will it snow in Paris?", 0.2, 1).unwrap(),
    ];
    let (clusters, groups) = Clusterer::new(c).cluster(&snaps);
    let grouped: usize = groups.iter().map(|g| g.cluster_count).sum();
    assert_eq!(grouped, clusters.len());
    assert_eq!(groups.iter().filter(|g| g.key == "crypto").count(), 1);
}

#[test]
fn empty_or_malformed_taxonomy_is_rejected() {
    assert!(ThemeClassifier::from_toml_str("").is_err());
    assert!(ThemeClassifier::from_toml_str("[[theme]]\nkey = ").is_err());
    assert!(ThemeClassifier::from_toml_str("[[theme]]\nkey = \"other\"\nkeywords = []").is_err());
}

#[serial_test::serial]
#[test]
fn from_toml_reads_env_path_and_falls_back_on_errors() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("themes.toml");
    fs::write(&good, "[[theme]]\nkey = \"weather\"\nkeywords = [\"snow\"]\n").unwrap();
    env::set_var(ENV_THEMES_CONFIG_PATH, good.display().to_string());
    assert_eq!(ThemeClassifier::from_toml().keys(), vec!["weather", OTHER]);

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[[theme]\n").unwrap();
    env::set_var(ENV_THEMES_CONFIG_PATH, bad.display().to_string());
    assert_eq!(
        ThemeClassifier::from_toml().keys(),
        ThemeClassifier::default_seed().keys()
    );

    env::set_var(ENV_THEMES_CONFIG_PATH, dir.path().join("missing.toml").display().to_string());
    assert_eq!(
        ThemeClassifier::from_toml().keys(),
        ThemeClassifier::default_seed().keys()
    );
    env::remove_var(ENV_THEMES_CONFIG_PATH);
}
