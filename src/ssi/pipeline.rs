// src/ssi/pipeline.rs
//! search → scrape → extract → cache, for the months the cache is missing.
//!
//! `run_on` never fails: every problem degrades to returning the best cached
//! data together with a [`RunOutcome`] describing what happened.

use chrono::{Local, NaiveDate, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{ConfigError, SsiSettings};
use crate::llm::DynChat;
use crate::ssi::cache::MonthlyCache;
use crate::ssi::extractor::ValueExtractor;
use crate::ssi::months::{month_label_to_key, target_months};
use crate::ssi::scraper::{ArticleScraper, ScrapeTally};
use crate::ssi::search::ArticleSearcher;
use crate::ssi::types::{
    DiscardedResult, ExtractionResult, MonthlyIndicatorRecord, PageFetcher, SearchApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Scrape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every target month already cached; no network calls were made.
    UpToDate,
    Updated { added: usize },
    /// A stage produced nothing; the cache is untouched.
    ShortCircuited { stage: Stage },
    /// Articles were processed but no value survived validation.
    NoExtractions,
    /// Credentials missing; nothing was attempted.
    Aborted(ConfigError),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::UpToDate => "up_to_date",
            RunOutcome::Updated { .. } => "updated",
            RunOutcome::ShortCircuited { .. } => "short_circuited",
            RunOutcome::NoExtractions => "no_extractions",
            RunOutcome::Aborted(_) => "aborted",
        }
    }

    pub fn added(&self) -> usize {
        match self {
            RunOutcome::Updated { added } => *added,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDiagnostics {
    pub run_at: String,
    pub target_months: Vec<String>,
    pub missing_months: Vec<String>,
    pub search_results: usize,
    pub scrape: ScrapeTally,
    pub articles_processed: usize,
    pub extractions: usize,
    pub added: usize,
    pub discarded: Vec<DiscardedResult>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// All valid cached records after the run, ascending by month.
    pub records: Vec<MonthlyIndicatorRecord>,
    pub diagnostics: RunDiagnostics,
}

pub struct SsiPipeline {
    searcher: ArticleSearcher,
    scraper: ArticleScraper,
    extractor: ValueExtractor,
    cache: MonthlyCache,
    window_months: u32,
    source_label: String,
    diagnostics_dir: Option<PathBuf>,
}

impl SsiPipeline {
    pub fn new(
        search: Box<dyn SearchApi>,
        fetcher: Box<dyn PageFetcher>,
        chat: DynChat,
        cache: MonthlyCache,
        settings: &SsiSettings,
    ) -> Self {
        Self {
            searcher: ArticleSearcher::new(
                search,
                settings.search_query.clone(),
                settings.search_pages,
                settings.pacing.search_pages(),
            ),
            scraper: ArticleScraper::new(fetcher, settings),
            extractor: ValueExtractor::new(chat, settings),
            cache,
            window_months: settings.window_months,
            source_label: settings.source_label.clone(),
            diagnostics_dir: None,
        }
    }

    /// Write a JSON run summary into `dir` after every run that reaches the network.
    pub fn with_diagnostics_dir(mut self, dir: PathBuf) -> Self {
        self.diagnostics_dir = Some(dir);
        self
    }

    pub fn cache(&self) -> &MonthlyCache {
        &self.cache
    }

    pub async fn run(&mut self) -> RunReport {
        self.run_on(Local::now().date_naive()).await
    }

    pub async fn run_on(&mut self, today: NaiveDate) -> RunReport {
        super::ensure_metrics_described();
        let targets = target_months(self.window_months, today);
        let missing = self.cache.missing_months(&targets);
        let mut diag = RunDiagnostics {
            run_at: Utc::now().to_rfc3339(),
            target_months: targets.clone(),
            missing_months: missing.clone(),
            ..RunDiagnostics::default()
        };

        if missing.is_empty() {
            info!(target: "ssi", "all target months cached, skipping fetch");
            return self.finish(RunOutcome::UpToDate, diag, false);
        }
        info!(target: "ssi", missing = missing.len(), "fetching SSI data for missing months");

        let results = self.searcher.search(today).await;
        diag.search_results = results.len();
        if results.is_empty() {
            warn!(target: "ssi", "no search results, keeping cache as-is");
            return self.finish(RunOutcome::ShortCircuited { stage: Stage::Search }, diag, true);
        }

        let scraped = self.scraper.scrape_all(&results).await;
        diag.scrape = scraped.tally.clone();
        if scraped.articles.is_empty() {
            warn!(target: "ssi", "no articles scraped, keeping cache as-is");
            return self.finish(RunOutcome::ShortCircuited { stage: Stage::Scrape }, diag, true);
        }

        let extracted = self.extractor.extract_all(&scraped.articles, &targets, today).await;
        diag.articles_processed = extracted.processed;
        diag.extractions = extracted.valid.len();
        diag.discarded = extracted.discarded;

        let target_keys: HashSet<String> = targets.iter().map(|m| month_label_to_key(m)).collect();
        let mut records = Vec::new();
        for x in extracted.valid {
            let key = month_label_to_key(&x.month);
            if target_keys.contains(&key) {
                records.push(self.to_record(key, x));
            } else {
                warn!(target: "ssi", month = %x.month, "extracted month outside target window");
                diag.discarded.push(DiscardedResult {
                    reason: format!("Month {} outside target window", x.month),
                    month: Some(x.month),
                    value: Some(x.level),
                    source_url: x.source_url,
                    source_title: x.source_title,
                });
            }
        }

        if records.is_empty() {
            warn!(target: "ssi", "no usable SSI values extracted");
            return self.finish(RunOutcome::NoExtractions, diag, true);
        }

        let added = self.cache.update(records);
        if let Err(e) = self.cache.save() {
            warn!(target: "ssi", error = ?e, "failed to persist SSI cache, keeping in-memory data");
        }
        diag.added = added;
        self.finish(RunOutcome::Updated { added }, diag, true)
    }

    fn to_record(&self, key: String, x: ExtractionResult) -> MonthlyIndicatorRecord {
        MonthlyIndicatorRecord {
            level: x.level,
            date: key,
            source_url: x.source_url,
            confidence: x.confidence,
            context: x.context,
            reasoning: x.reasoning,
            source: Some(self.source_label.clone()),
            updated_at: None,
        }
    }

    fn finish(&self, outcome: RunOutcome, diag: RunDiagnostics, write_diag: bool) -> RunReport {
        counter!("ssi_pipeline_runs_total", "outcome" => outcome.label()).increment(1);
        gauge!("ssi_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        let records = self.cache.all_records();
        gauge!("ssi_cached_months").set(records.len() as f64);
        if write_diag {
            if let Some(dir) = &self.diagnostics_dir {
                write_diagnostics(dir, &diag);
            }
        }
        info!(target: "ssi", outcome = outcome.label(), added = outcome.added(), cached = records.len(), "SSI run finished");
        RunReport {
            outcome,
            records,
            diagnostics: diag,
        }
    }
}

fn write_diagnostics(dir: &Path, diag: &RunDiagnostics) {
    let name = format!("ssi_run_{}.json", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(name);
    let res = fs::create_dir_all(dir)
        .and_then(|_| serde_json::to_string_pretty(diag).map_err(std::io::Error::other))
        .and_then(|json| fs::write(&path, json));
    match res {
        Ok(()) => info!(target: "ssi", path = %path.display(), "wrote run diagnostics"),
        Err(e) => warn!(target: "ssi", error = %e, "could not write run diagnostics"),
    }
}

/// Report for a run that never started; carries whatever the cache already holds.
pub fn aborted(cache: &MonthlyCache, err: ConfigError) -> RunReport {
    warn!(target: "ssi", error = %err, "SSI update aborted");
    counter!("ssi_pipeline_runs_total", "outcome" => "aborted").increment(1);
    RunReport {
        outcome: RunOutcome::Aborted(err),
        records: cache.all_records(),
        diagnostics: RunDiagnostics::default(),
    }
}
