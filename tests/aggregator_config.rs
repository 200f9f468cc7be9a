// tests/aggregator_config.rs
use prediction_aggregator::config::aggregator::{
    ENV_CONFIG_PATH, ENV_DEFAULT_LIMIT, ENV_RESPONSE_TTL_MS, ENV_STALE_CEILING_MS,
};
use prediction_aggregator::config::AggregatorConfig;
use std::{env, fs};

fn clear_env() {
    for k in [
        ENV_CONFIG_PATH,
        ENV_RESPONSE_TTL_MS,
        ENV_STALE_CEILING_MS,
        ENV_DEFAULT_LIMIT,
    ] {
        env::remove_var(k);
    }
}

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("aggregator.toml");
    fs::write(
        &p_toml,
        r#"
response_ttl_ms = 2000

[limit]
max = 50

[polymarket]
enabled = false
"#,
    )
    .unwrap();
    let c = AggregatorConfig::load_from(&p_toml).unwrap();
    assert_eq!(c.response_ttl_ms, 2_000);
    assert_eq!(c.limit.max, 50);
    assert_eq!(c.limit.default, 50, "default is pulled inside the bounds");
    assert!(!c.polymarket.enabled);
    assert!(c.polymarket.aux_url.is_some(), "blank fields keep defaults");

    let p_json = dir.path().join("aggregator.json");
    fs::write(&p_json, r#"{"manifold": {"ttl_ms": 0, "max_concurrency": 0}}"#).unwrap();
    let cj = AggregatorConfig::load_from(&p_json).unwrap();
    assert_eq!(cj.manifold.ttl_ms, AggregatorConfig::default().manifold.ttl_ms);
    assert_eq!(cj.manifold.max_concurrency, 1);
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("aggregator.toml");
    fs::write(&p, "response_ttl_ms = [").unwrap();
    assert!(AggregatorConfig::load_from(&p).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is never read.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) Nothing → built-in defaults
    let c = AggregatorConfig::load_default().unwrap();
    assert_eq!(c, AggregatorConfig::default());

    // 2) Fallback TOML in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("aggregator.toml"), "response_ttl_ms = 7000").unwrap();
    assert_eq!(AggregatorConfig::load_default().unwrap().response_ttl_ms, 7_000);

    // 3) Env path wins over ./config/
    let p_env = tmp.path().join("other.json");
    fs::write(&p_env, r#"{"response_ttl_ms": 9000}"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    assert_eq!(AggregatorConfig::load_default().unwrap().response_ttl_ms, 9_000);

    // 4) Dangling env path is reported
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(AggregatorConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_after_file() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    env::set_var(ENV_RESPONSE_TTL_MS, "1234");
    env::set_var(ENV_STALE_CEILING_MS, "10");
    env::set_var(ENV_DEFAULT_LIMIT, "25");
    let c = AggregatorConfig::load_default().unwrap();
    assert_eq!(c.response_ttl_ms, 1_234);
    assert_eq!(c.stale_ceiling_ms, 1_234, "ceiling never undercuts the TTL");
    assert_eq!(c.limit.default, 25);

    env::set_var(ENV_RESPONSE_TTL_MS, "not-a-number");
    let c = AggregatorConfig::load_default().unwrap();
    assert_eq!(c.response_ttl_ms, AggregatorConfig::default().response_ttl_ms);

    clear_env();
    env::set_current_dir(&old).unwrap();
}
