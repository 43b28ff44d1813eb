// src/ssi/mod.rs
//! Bank of America Sell-Side Indicator: discovery, scraping, extraction and
//! the month-keyed cache that the dashboard and emails read from.

pub mod cache;
pub mod extractor;
pub mod months;
pub mod pipeline;
pub mod readability;
pub mod scraper;
pub mod search;
pub mod types;

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::llm::build_chat;

pub use cache::{CacheStats, MonthlyCache};
pub use pipeline::{RunOutcome, RunReport, SsiPipeline, Stage};
pub use types::{Confidence, MonthlyIndicatorRecord};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ssi_search_results_total", "Unique search results returned.");
        describe_counter!("ssi_search_errors_total", "Search page requests that failed.");
        describe_counter!("ssi_articles_scraped_total", "Articles scraped with usable text.");
        describe_counter!(
            "ssi_scrape_failures_total",
            "Articles abandoned, labelled by kind (download/extraction)."
        );
        describe_counter!("ssi_extractions_total", "Validated SSI values extracted.");
        describe_counter!("ssi_discards_total", "Model entries rejected by validation.");
        describe_counter!("ssi_extraction_errors_total", "Articles whose model call or JSON failed.");
        describe_counter!("ssi_pipeline_runs_total", "Pipeline runs by outcome.");
        describe_gauge!("ssi_pipeline_last_run_ts", "Unix ts when the SSI pipeline last ran.");
        describe_gauge!("ssi_cached_months", "Valid months held in the SSI cache.");
    });
}

/// Run the pipeline with the production clients described by `cfg`.
///
/// Missing credentials abort before any network call; the cached records
/// are still returned.
pub async fn run_ssi_update(cfg: &AppConfig) -> RunReport {
    ensure_metrics_described();
    let cache = MonthlyCache::load(cfg.paths.ssi_cache());

    let (serp_key, _) = match cfg.pipeline_credentials() {
        Ok(keys) => keys,
        Err(e) => return pipeline::aborted(&cache, e),
    };

    let search = match search::SerpApi::new(
        &cfg.ssi.search_endpoint,
        &serp_key,
        Duration::from_secs(cfg.ssi.search_timeout_secs),
    ) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(target: "ssi", error = ?e, "cannot build search client");
            return pipeline::RunReport {
                outcome: RunOutcome::ShortCircuited { stage: Stage::Search },
                records: cache.all_records(),
                diagnostics: Default::default(),
            };
        }
    };
    let fetcher = match scraper::HttpFetcher::new(&cfg.ssi) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(target: "ssi", error = ?e, "cannot build article fetcher");
            return pipeline::RunReport {
                outcome: RunOutcome::ShortCircuited { stage: Stage::Scrape },
                records: cache.all_records(),
                diagnostics: Default::default(),
            };
        }
    };
    let chat = build_chat(&cfg.llm);
    info!(target: "ssi", model = %cfg.llm.model, provider = chat.name(), "starting SSI update");

    let mut pipeline = SsiPipeline::new(Box::new(search), Box::new(fetcher), chat, cache, &cfg.ssi);
    if cfg.ssi.write_diagnostics {
        pipeline = pipeline.with_diagnostics_dir(cfg.paths.logs_dir.clone());
    }
    pipeline.run().await
}

/// Cached records only, no network.
pub fn cached_records(cfg: &AppConfig) -> Vec<MonthlyIndicatorRecord> {
    MonthlyCache::load(cfg.paths.ssi_cache()).all_records()
}
