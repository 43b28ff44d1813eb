// tests/common/mod.rs
// Shared setup: an AppConfig rooted in a temp dir, with snapshot caches built from fixtures.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use market_sentiment_terminal::config::AppConfig;
use market_sentiment_terminal::indicators::{aaii, write_snapshot, FearGreedSnapshot};

pub const FNG_FIXTURE: &str = include_str!("../fixtures/fng_graphdata.json");
pub const AAII_FIXTURE: &str = include_str!("../fixtures/aaii_sentiment.csv");

pub fn config_in(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.paths.cache_dir = dir.join("cache");
    cfg.paths.data_dir = dir.join("data");
    cfg.paths.logs_dir = dir.join("logs");
    cfg.paths.static_dir = dir.join("static");
    cfg.paths.templates_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("email_templates");
    cfg.dashboard.url = "https://dash.example.com".into();
    cfg
}

pub fn write_fng(cfg: &AppConfig) -> FearGreedSnapshot {
    let data: serde_json::Value = serde_json::from_str(FNG_FIXTURE).unwrap();
    let mut snap = FearGreedSnapshot::from_graphdata(&data).unwrap();
    snap.commentary = Some("Fear is creeping back in.".into());
    write_snapshot(&cfg.paths.fng_cache(), &snap).unwrap();
    snap
}

pub fn write_aaii(cfg: &AppConfig) -> aaii::AaiiSnapshot {
    let rows = aaii::parse_history_csv(AAII_FIXTURE);
    let snap = aaii::summarize(&rows).unwrap();
    write_snapshot(&cfg.paths.aaii_cache(), &snap).unwrap();
    snap
}
