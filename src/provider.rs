// src/provider.rs
//! Getter layer (reads cached snapshots for the web server and emails) and
//! fetcher layer (the batch refresh behind `update-cache`).

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::indicators::{
    aaii, read_snapshot, write_snapshot, AaiiSnapshot, FearGreedSnapshot, Unavailable,
};
use crate::indicators::fear_greed::FearGreedClient;
use crate::llm::commentary::{OverallAnalysis, SsiReading};
use crate::llm::{build_cached_chat, Commentator};
use crate::ssi::{self, MonthlyCache, MonthlyIndicatorRecord, RunOutcome};

pub const FNG_LABEL: &str = "Fear & Greed";
pub const AAII_LABEL: &str = "AAII Sentiment";
pub const SSI_LABEL: &str = "SSI";

// ------------------------------------------------------------
// Getters
// ------------------------------------------------------------

pub fn fear_greed(cfg: &AppConfig) -> Result<FearGreedSnapshot, Unavailable> {
    read_snapshot(&cfg.paths.fng_cache(), FNG_LABEL)
}

pub fn aaii_sentiment(cfg: &AppConfig) -> Result<AaiiSnapshot, Unavailable> {
    read_snapshot(&cfg.paths.aaii_cache(), AAII_LABEL)
}

/// Falls back to HOLD / "Commentary unavailable." when nothing is cached.
pub fn overall_analysis(cfg: &AppConfig) -> OverallAnalysis {
    read_snapshot(&cfg.paths.overall_cache(), "Overall analysis").unwrap_or_default()
}

/// Valid SSI records ascending by month. A missing cache file is unavailable;
/// an unreadable one reads as empty.
pub fn ssi_records(cfg: &AppConfig) -> Result<Vec<MonthlyIndicatorRecord>, Unavailable> {
    let path = cfg.paths.ssi_cache();
    if !path.exists() {
        return Err(Unavailable(SSI_LABEL));
    }
    Ok(MonthlyCache::load(path).all_records())
}

fn latest_ssi(records: &[MonthlyIndicatorRecord]) -> Option<SsiReading> {
    records.last().map(|r| SsiReading {
        level: r.level,
        date: r.date.clone(),
    })
}

// ------------------------------------------------------------
// Fetchers
// ------------------------------------------------------------

pub async fn refresh_fear_greed(cfg: &AppConfig, commentator: &Commentator) -> Result<FearGreedSnapshot> {
    let mut snap = FearGreedClient::new(&cfg.fear_greed)?.fetch().await?;
    snap.commentary = Some(match (snap.score, snap.rating.as_deref()) {
        (Some(score), Some(rating)) => commentator.fear_greed(score, rating).await,
        _ => crate::llm::commentary::UNAVAILABLE.to_string(),
    });
    write_snapshot(&cfg.paths.fng_cache(), &snap).context("caching fear & greed")?;
    Ok(snap)
}

pub async fn refresh_aaii(cfg: &AppConfig, commentator: &Commentator) -> Result<AaiiSnapshot> {
    let rows = aaii::fetch_history(&cfg.aaii).await?;
    let mut snap = aaii::summarize(&rows).context("no AAII rows to summarize")?;
    snap.commentary = Some(commentator.aaii(snap.bullish, snap.bearish).await);
    write_snapshot(&cfg.paths.aaii_cache(), &snap).context("caching AAII")?;
    Ok(snap)
}

pub async fn refresh_overall(
    cfg: &AppConfig,
    commentator: &Commentator,
    fng: Option<&FearGreedSnapshot>,
    aaii: Option<&AaiiSnapshot>,
    ssi: &[MonthlyIndicatorRecord],
) -> OverallAnalysis {
    let fng_in = fng.and_then(|f| Some((f.score?, f.rating.as_deref()?)));
    let aaii_in = aaii.map(|a| (a.bullish, a.bearish));
    let latest = latest_ssi(ssi);
    let overall = commentator.overall(fng_in, aaii_in, latest.as_ref()).await;
    if let Err(e) = write_snapshot(&cfg.paths.overall_cache(), &overall) {
        warn!(target: "provider", error = ?e, "failed to cache overall analysis");
    }
    overall
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub fear_greed: bool,
    pub aaii: bool,
    /// `None` when the SSI step was skipped.
    pub ssi_outcome: Option<String>,
    pub ssi_added: usize,
    pub recommendation: String,
}

/// Refresh every snapshot. One source failing never stops the others.
pub async fn refresh_all(cfg: &AppConfig, include_ssi: bool) -> RefreshSummary {
    let chat = build_cached_chat(&cfg.llm, cfg.paths.llm_cache_dir());
    let commentator = Commentator::new(chat, &cfg.llm);

    let fng = match refresh_fear_greed(cfg, &commentator).await {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(target: "provider", error = ?e, "fear & greed refresh failed, cache not updated");
            None
        }
    };
    let aaii = match refresh_aaii(cfg, &commentator).await {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(target: "provider", error = ?e, "AAII refresh failed, cache not updated");
            None
        }
    };

    let (ssi_outcome, ssi_added, records) = if include_ssi {
        let report = ssi::run_ssi_update(cfg).await;
        let label = match &report.outcome {
            RunOutcome::Aborted(e) => format!("aborted: {e}"),
            other => other.label().to_string(),
        };
        (Some(label), report.outcome.added(), report.records)
    } else {
        (None, 0, ssi::cached_records(cfg))
    };

    let overall = refresh_overall(cfg, &commentator, fng.as_ref(), aaii.as_ref(), &records).await;

    let summary = RefreshSummary {
        fear_greed: fng.is_some(),
        aaii: aaii.is_some(),
        ssi_outcome,
        ssi_added,
        recommendation: overall.recommendation,
    };
    info!(target: "provider", ?summary, "cache refresh finished");
    summary
}
