// src/ssi/search.rs
//! Candidate-article discovery through a Google-style search API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::pacing::Pacer;
use crate::ssi::types::{SearchApi, SearchResult};

pub const RESULTS_PER_PAGE: u32 = 10;

/// SerpAPI `engine=google` client.
pub struct SerpApi {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl SerpApi {
    pub fn new(endpoint: &str, api_key: &str, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building search http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<SearchResult>,
}

#[async_trait]
impl SearchApi for SerpApi {
    async fn organic_results(&self, query: &str, start: u32) -> Result<Vec<SearchResult>> {
        let num = RESULTS_PER_PAGE.to_string();
        let start = start.to_string();
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("hl", "en"),
                ("gl", "us"),
                ("num", num.as_str()),
                ("start", start.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("search request")?
            .error_for_status()
            .context("search non-2xx")?;
        let body: SerpResponse = resp.json().await.context("decoding search response")?;
        Ok(body.organic_results)
    }

    fn name(&self) -> &'static str {
        "serpapi"
    }
}

/// Paginates a [`SearchApi`], dedups by URL and normalizes relative dates.
pub struct ArticleSearcher {
    api: Box<dyn SearchApi>,
    query: String,
    max_pages: u32,
    pacer: Pacer,
}

impl ArticleSearcher {
    pub fn new(api: Box<dyn SearchApi>, query: impl Into<String>, max_pages: u32, pacer: Pacer) -> Self {
        Self {
            api,
            query: query.into(),
            max_pages,
            pacer,
        }
    }

    /// Collect up to `max_pages` pages. An empty page or a failed request ends
    /// the loop; whatever was gathered so far is still returned.
    pub async fn search(&mut self, today: NaiveDate) -> Vec<SearchResult> {
        info!(target: "ssi", query = %self.query, backend = self.api.name(), "searching for SSI articles");
        self.pacer.reset();
        let mut all = Vec::new();
        for page in 0..self.max_pages {
            self.pacer.wait().await;
            let start = page * RESULTS_PER_PAGE;
            match self.api.organic_results(&self.query, start).await {
                Ok(results) if results.is_empty() => {
                    debug!(target: "ssi", page = page + 1, "empty result page, stopping");
                    break;
                }
                Ok(results) => {
                    debug!(target: "ssi", page = page + 1, count = results.len(), "result page");
                    all.extend(results);
                }
                Err(e) => {
                    warn!(target: "ssi", page = page + 1, error = ?e, "search page failed, stopping");
                    counter!("ssi_search_errors_total").increment(1);
                    break;
                }
            }
        }

        let mut unique = dedup_by_link(all);
        normalize_relative_dates(&mut unique, today);
        counter!("ssi_search_results_total").increment(unique.len() as u64);
        info!(target: "ssi", unique = unique.len(), "search complete");
        unique
    }
}

/// Keep the first occurrence of every non-empty link.
pub fn dedup_by_link(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.link.is_empty() && seen.insert(r.link.clone()))
        .collect()
}

static RE_DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+days?\s+ago").unwrap());
static RE_WEEKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+weeks?\s+ago").unwrap());
static RE_MONTHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+months?\s+ago").unwrap());

/// Resolve "3 days ago", "2 weeks ago", "1 month ago" (30 days), "yesterday"
/// and "today" against `today`. Anything else, or a count too large to
/// subtract, is `None`.
pub fn resolve_relative_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = raw.to_lowercase();
    let count = |re: &Regex| -> Option<i64> {
        re.captures(&s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    };

    if let Some(n) = count(&RE_DAYS) {
        return TimeDelta::try_days(n).and_then(|d| today.checked_sub_signed(d));
    }
    if let Some(n) = count(&RE_WEEKS) {
        return TimeDelta::try_weeks(n).and_then(|d| today.checked_sub_signed(d));
    }
    if let Some(n) = count(&RE_MONTHS) {
        // Months are approximated as 30 days.
        return n
            .checked_mul(30)
            .and_then(TimeDelta::try_days)
            .and_then(|d| today.checked_sub_signed(d));
    }
    if s.contains("yesterday") {
        return today.pred_opt();
    }
    if s.contains("today") {
        return Some(today);
    }
    None
}

/// Rewrite relative dates in place as "Jun 12, 2025", keeping the original string.
pub fn normalize_relative_dates(results: &mut [SearchResult], today: NaiveDate) {
    for r in results.iter_mut() {
        if r.date.is_empty() {
            continue;
        }
        if let Some(abs) = resolve_relative_date(&r.date, today) {
            let formatted = abs.format("%b %d, %Y").to_string();
            debug!(target: "ssi", from = %r.date, to = %formatted, "converted relative date");
            r.original_date = Some(std::mem::replace(&mut r.date, formatted));
        }
    }
}
