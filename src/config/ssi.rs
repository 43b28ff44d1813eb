// src/config/ssi.rs
//! Tunables for the Sell-Side Indicator pipeline. Every field has a default so
//! an empty `[ssi]` table (or none at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pacing::Pacer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsiSettings {
    /// Past months covered by the target window (current and next month are added).
    pub window_months: u32,
    pub search_endpoint: String,
    pub search_query: String,
    pub search_pages: u32,
    pub search_timeout_secs: u64,
    /// Cap on scraped articles; `None` scrapes every search result.
    pub max_articles: Option<usize>,
    /// Visited once before the first article fetch to pick up cookies.
    pub homepage_url: String,
    pub user_agents: Vec<String>,
    pub fetch_timeout_secs: u64,
    pub warmup_timeout_secs: u64,
    pub max_attempts: u32,
    /// Downloads smaller than this are treated as failed (bot walls, stubs).
    pub min_html_bytes: usize,
    pub min_article_chars: usize,
    pub max_article_chars: usize,
    pub level_min: f64,
    pub level_max: f64,
    pub extract_max_tokens: u32,
    /// Provenance tag stored with each cached record.
    pub source_label: String,
    pub write_diagnostics: bool,
    pub pacing: PacingConfig,
}

impl Default for SsiSettings {
    fn default() -> Self {
        Self {
            window_months: 12,
            search_endpoint: "https://serpapi.com/search.json".into(),
            search_query: "site:investing.com Bank of America Sell Side Indicator".into(),
            search_pages: 3,
            search_timeout_secs: 30,
            max_articles: None,
            homepage_url: "https://www.investing.com/".into(),
            user_agents: default_user_agents(),
            fetch_timeout_secs: 30,
            warmup_timeout_secs: 15,
            max_attempts: 2,
            min_html_bytes: 1000,
            min_article_chars: 100,
            max_article_chars: 15_000,
            level_min: 40.0,
            level_max: 80.0,
            extract_max_tokens: 1000,
            source_label: "serpapi+readability+openai".into(),
            write_diagnostics: true,
            pacing: PacingConfig::default(),
        }
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Pacing intervals in milliseconds. `min == max` means a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub search_page_ms: u64,
    pub scrape_min_ms: u64,
    pub scrape_max_ms: u64,
    pub retry_min_ms: u64,
    pub retry_max_ms: u64,
    pub warmup_min_ms: u64,
    pub warmup_max_ms: u64,
    pub extract_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            search_page_ms: 500,
            scrape_min_ms: 1_000,
            scrape_max_ms: 3_000,
            retry_min_ms: 2_000,
            retry_max_ms: 4_000,
            warmup_min_ms: 500,
            warmup_max_ms: 1_500,
            extract_ms: 500,
        }
    }
}

impl PacingConfig {
    /// No delays anywhere; used by tests and dry runs.
    pub fn disabled() -> Self {
        Self {
            search_page_ms: 0,
            scrape_min_ms: 0,
            scrape_max_ms: 0,
            retry_min_ms: 0,
            retry_max_ms: 0,
            warmup_min_ms: 0,
            warmup_max_ms: 0,
            extract_ms: 0,
        }
    }

    pub fn search_pages(&self) -> Pacer {
        Pacer::fixed(ms(self.search_page_ms))
    }

    /// Randomized delay before every article request, including the first.
    pub fn scrape(&self) -> Pacer {
        Pacer::jittered(ms(self.scrape_min_ms), ms(self.scrape_max_ms))
            .leading()
            .always()
    }

    pub fn retry(&self) -> Pacer {
        Pacer::jittered(ms(self.retry_min_ms), ms(self.retry_max_ms)).always()
    }

    pub fn warmup(&self) -> Pacer {
        Pacer::jittered(ms(self.warmup_min_ms), ms(self.warmup_max_ms)).leading()
    }

    pub fn extract(&self) -> Pacer {
        Pacer::fixed(ms(self.extract_ms))
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let s: SsiSettings = toml::from_str(
            r#"
            window_months = 6
            [pacing]
            extract_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(s.window_months, 6);
        assert_eq!(s.search_pages, 3);
        assert_eq!(s.pacing.extract_ms, 0);
        assert_eq!(s.pacing.scrape_max_ms, 3_000);
        assert_eq!(s.user_agents.len(), 4);
    }
}
