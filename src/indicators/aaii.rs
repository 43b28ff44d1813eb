// src/indicators/aaii.rs
//! AAII weekly sentiment survey.
//!
//! The survey history comes from a CSV export of the AAII spreadsheet (the
//! site blocks automated downloads). The newest week can be topped up from
//! YCharts, which publishes each series on its own page.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::round1;
use crate::config::AaiiConfig;

/// One survey week. Percentages are stored as fractions (0.385 = 38.5%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AaiiRow {
    pub date: NaiveDate,
    pub bullish: f64,
    pub neutral: f64,
    pub bearish: f64,
}

impl AaiiRow {
    fn spread_pct(&self) -> f64 {
        (self.bullish - self.bearish) * 100.0
    }
}

const DATE_FORMATS: &[&str] = &["%m-%d-%Y", "%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y", "%m-%d-%y"];

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

/// "38.5%" → 0.385, "0.385" → 0.385, "38.5" → 0.385.
fn parse_fraction(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(pct) = s.strip_suffix('%') {
        return pct.trim().parse::<f64>().ok().map(|v| v / 100.0);
    }
    let v: f64 = s.parse().ok()?;
    Some(if v > 1.0 { v / 100.0 } else { v })
}

/// Parse `Date,Bullish,Neutral,Bearish[,...]` rows. Header, blank and
/// malformed rows are skipped. Result is ascending by date, one row per date.
pub fn parse_history_csv(text: &str) -> Vec<AaiiRow> {
    let mut rows: Vec<AaiiRow> = text
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split(',').map(|c| c.trim().trim_matches('"')).collect();
            if cols.len() < 4 {
                return None;
            }
            Some(AaiiRow {
                date: parse_date(cols[0])?,
                bullish: parse_fraction(cols[1])?,
                neutral: parse_fraction(cols[2])?,
                bearish: parse_fraction(cols[3])?,
            })
        })
        .collect();
    rows.sort_by_key(|r| r.date);
    rows.dedup_by(|later, earlier| {
        if later.date == earlier.date {
            *earlier = *later;
            true
        } else {
            false
        }
    });
    rows
}

pub fn load_history(path: &Path) -> Result<Vec<AaiiRow>> {
    let text = fs::read_to_string(path).with_context(|| {
        format!(
            "reading {} (download the sentiment survey export from aaii.com)",
            path.display()
        )
    })?;
    let rows = parse_history_csv(&text);
    if rows.is_empty() {
        bail!("no survey rows in {}", path.display());
    }
    info!(target: "indicators", rows = rows.len(), path = %path.display(), "loaded AAII history");
    Ok(rows)
}

/// Append `latest` when it is newer than every row in `rows`.
pub fn merge_latest(rows: &mut Vec<AaiiRow>, latest: AaiiRow) -> bool {
    let newest = rows.last().map(|r| r.date);
    if newest.map_or(true, |d| latest.date > d) {
        rows.push(latest);
        true
    } else {
        false
    }
}

// ------------------------------------------------------------
// YCharts
// ------------------------------------------------------------

pub const YCHARTS_SERIES: &[(&str, &str)] = &[
    ("bullish", "https://ycharts.com/indicators/us_investor_sentiment_bullish"),
    ("bearish", "https://ycharts.com/indicators/us_investor_sentiment_bearish"),
    ("neutral", "https://ycharts.com/indicators/us_investor_sentiment_neutral"),
];

static RE_INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([0-9.]+)%\s*for\s*Wk of\s*([A-Za-z]{3}\s+\d{2}\s+\d{4})").unwrap()
});
static RE_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"is at ([0-9.]+)%").unwrap());
static RE_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Latest Period\s*\|\s*([A-Za-z]{3} \d{2} \d{4})").unwrap());

/// Percentage and week date from one YCharts indicator page.
pub fn parse_ycharts_page(html: &str) -> Option<(f64, NaiveDate)> {
    let (pct, date) = if let Some(c) = RE_INLINE.captures(html) {
        (c.get(1)?.as_str().to_string(), c.get(2)?.as_str().to_string())
    } else {
        let v = RE_VALUE.captures(html)?.get(1)?.as_str().to_string();
        let d = RE_PERIOD.captures(html)?.get(1)?.as_str().to_string();
        (v, d)
    };
    let date = date.split_whitespace().collect::<Vec<_>>().join(" ");
    Some((
        pct.parse().ok()?,
        NaiveDate::parse_from_str(&date, "%b %d %Y").ok()?,
    ))
}

pub struct YChartsClient {
    http: reqwest::Client,
}

impl YChartsClient {
    pub fn new(cfg: &AaiiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building ycharts http client")?;
        Ok(Self { http })
    }

    /// Latest week across the three series pages; every page must parse.
    pub async fn latest(&self) -> Result<AaiiRow> {
        let (mut bull, mut bear, mut neutral) = (None, None, None);
        let mut latest: Option<NaiveDate> = None;
        for (name, url) in YCHARTS_SERIES {
            let html = self
                .http
                .get(*url)
                .send()
                .await
                .with_context(|| format!("ycharts {name} request"))?
                .error_for_status()?
                .text()
                .await?;
            let (pct, date) =
                parse_ycharts_page(&html).ok_or_else(|| anyhow!("could not parse {name} series from YCharts page"))?;
            if latest.is_some_and(|d| d != date) {
                warn!(target: "indicators", series = *name, %date, "ycharts series dates differ, using latest");
            }
            latest = Some(latest.map_or(date, |d| d.max(date)));
            match *name {
                "bullish" => bull = Some(pct),
                "bearish" => bear = Some(pct),
                _ => neutral = Some(pct),
            }
        }
        match (latest, bull, neutral, bear) {
            (Some(date), Some(b), Some(n), Some(br)) => Ok(AaiiRow {
                date,
                bullish: b / 100.0,
                neutral: n / 100.0,
                bearish: br / 100.0,
            }),
            _ => bail!("incomplete ycharts data"),
        }
    }
}

/// History from the CSV export, topped up from YCharts when enabled.
pub async fn fetch_history(cfg: &AaiiConfig) -> Result<Vec<AaiiRow>> {
    let mut rows = load_history(&cfg.history_csv)?;
    if !cfg.ycharts_enabled {
        return Ok(rows);
    }
    let online = match YChartsClient::new(cfg) {
        Ok(c) => c.latest().await,
        Err(e) => Err(e),
    };
    match online {
        Ok(latest) => {
            if merge_latest(&mut rows, latest) {
                info!(target: "indicators", date = %latest.date, "appended YCharts AAII week");
            } else {
                info!(target: "indicators", "YCharts AAII week not newer than history");
            }
        }
        Err(e) => warn!(target: "indicators", error = ?e, "YCharts AAII data unavailable, using file history only"),
    }
    Ok(rows)
}

// ------------------------------------------------------------
// Summary
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub date: String,
    pub bullish: f64,
    pub bearish: f64,
    pub spread: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Historical {
    #[serde(rename = "1w_ago", default, skip_serializing_if = "Option::is_none")]
    pub week_ago: Option<HistoricalPoint>,
    #[serde(rename = "1m_ago", default, skip_serializing_if = "Option::is_none")]
    pub month_ago: Option<HistoricalPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics52w {
    pub bull_min: f64,
    pub bull_max: f64,
    pub bull_avg: f64,
    pub bear_min: f64,
    pub bear_max: f64,
    pub bear_avg: f64,
    pub spread_min: f64,
    pub spread_max: f64,
    pub spread_avg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedValue {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series52w {
    pub bullish: Vec<DatedValue>,
    pub bearish: Vec<DatedValue>,
    pub spread: Vec<DatedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AaiiSnapshot {
    pub report_date: String,
    pub bullish: f64,
    pub neutral: f64,
    pub bearish: f64,
    #[serde(default)]
    pub historical: Historical,
    pub statistics_52w: Statistics52w,
    pub bullish_avg: f64,
    pub bearish_avg: f64,
    pub bull_vs_avg: f64,
    pub bear_vs_avg: f64,
    pub spread_vs_avg: f64,
    pub spread_avg: f64,
    #[serde(default)]
    pub historical_52w: Series52w,
    pub commentary: Option<String>,
}

impl AaiiSnapshot {
    pub fn spread(&self) -> f64 {
        round1(self.bullish - self.bearish)
    }
}

fn ymd(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn point(r: &AaiiRow) -> HistoricalPoint {
    HistoricalPoint {
        date: ymd(r.date),
        bullish: round1(r.bullish * 100.0),
        bearish: round1(r.bearish * 100.0),
        spread: round1(r.spread_pct()),
    }
}

/// Latest row dated on or before `cutoff`.
fn latest_on_or_before(rows: &[AaiiRow], cutoff: NaiveDate) -> Option<&AaiiRow> {
    rows.iter().rev().find(|r| r.date <= cutoff)
}

fn min_max_avg(values: impl Iterator<Item = f64> + Clone) -> (f64, f64, f64) {
    let n = values.clone().count().max(1) as f64;
    let min = values.clone().fold(f64::INFINITY, f64::min);
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.sum::<f64>() / n;
    (round1(min), round1(max), round1(avg))
}

/// Summary for the newest week. `rows` must be ascending by date.
pub fn summarize(rows: &[AaiiRow]) -> Option<AaiiSnapshot> {
    let latest = rows.last()?;

    let window: Vec<&AaiiRow> = rows
        .iter()
        .filter(|r| r.date >= latest.date - Duration::weeks(52))
        .collect();
    let (bull_min, bull_max, bull_avg) = min_max_avg(window.iter().map(|r| r.bullish * 100.0));
    let (bear_min, bear_max, bear_avg) = min_max_avg(window.iter().map(|r| r.bearish * 100.0));
    let (spread_min, spread_max, spread_avg_52) = min_max_avg(window.iter().map(|r| r.spread_pct()));

    let series = |f: fn(&AaiiRow) -> f64| -> Vec<DatedValue> {
        window
            .iter()
            .map(|r| DatedValue {
                date: ymd(r.date),
                value: round1(f(r)),
            })
            .collect()
    };

    let n = rows.len() as f64;
    let bullish_avg = rows.iter().map(|r| r.bullish).sum::<f64>() / n * 100.0;
    let bearish_avg = rows.iter().map(|r| r.bearish).sum::<f64>() / n * 100.0;
    let spread_avg = rows.iter().map(AaiiRow::spread_pct).sum::<f64>() / n;

    Some(AaiiSnapshot {
        report_date: ymd(latest.date),
        bullish: round1(latest.bullish * 100.0),
        neutral: round1(latest.neutral * 100.0),
        bearish: round1(latest.bearish * 100.0),
        historical: Historical {
            week_ago: latest_on_or_before(rows, latest.date - Duration::days(7)).map(point),
            month_ago: latest_on_or_before(rows, latest.date - Duration::days(30)).map(point),
        },
        statistics_52w: Statistics52w {
            bull_min,
            bull_max,
            bull_avg,
            bear_min,
            bear_max,
            bear_avg,
            spread_min,
            spread_max,
            spread_avg: spread_avg_52,
        },
        bullish_avg: round1(bullish_avg),
        bearish_avg: round1(bearish_avg),
        bull_vs_avg: round1(latest.bullish * 100.0 - bullish_avg),
        bear_vs_avg: round1(latest.bearish * 100.0 - bearish_avg),
        spread_vs_avg: round1(latest.spread_pct() - spread_avg),
        spread_avg: round1(spread_avg),
        historical_52w: Series52w {
            bullish: series(|r| r.bullish * 100.0),
            bearish: series(|r| r.bearish * 100.0),
            spread: series(AaiiRow::spread_pct),
        },
        commentary: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn csv_accepts_percent_and_fraction_columns() {
        let csv = "\
Reported Date,Bullish,Neutral,Bearish,Total
,,,,
06-12-2025,\"36.7%\",\"30.0%\",\"33.3%\",100%
06-05-2025,0.324,0.305,0.371,1
not a date,1,2,3
06-12-2025,36.7,30.0,33.3
";
        let rows = parse_history_csv(csv);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(2025, 6, 5));
        assert!((rows[1].bullish - 0.367).abs() < 1e-9);
        assert!((rows[0].bearish - 0.371).abs() < 1e-9);
    }

    #[test]
    fn ycharts_inline_and_split_formats() {
        let inline = "<div>US Investor Sentiment, % Bullish: 36.72% for Wk of Jun 12 2025</div>";
        assert_eq!(parse_ycharts_page(inline), Some((36.72, d(2025, 6, 12))));

        let split = "<p>Bearish is at 33.30%, up from 30.1% last week.</p><table><tr><td>Latest Period | Jun 12 2025</td></tr></table>";
        assert_eq!(parse_ycharts_page(split), Some((33.3, d(2025, 6, 12))));

        assert_eq!(parse_ycharts_page("<html>captcha</html>"), None);
    }

    #[test]
    fn merge_only_appends_newer_weeks() {
        let mut rows = vec![AaiiRow { date: d(2025, 6, 5), bullish: 0.3, neutral: 0.3, bearish: 0.4 }];
        let older = AaiiRow { date: d(2025, 6, 5), ..rows[0] };
        assert!(!merge_latest(&mut rows, older));
        let newer = AaiiRow { date: d(2025, 6, 12), ..rows[0] };
        assert!(merge_latest(&mut rows, newer));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn summary_statistics() {
        // 60 weekly rows; bullish ramps 20% → 79%, bearish fixed at 30%
        let start = d(2024, 4, 18);
        let rows: Vec<AaiiRow> = (0..60)
            .map(|i| AaiiRow {
                date: start + Duration::weeks(i),
                bullish: (20 + i) as f64 / 100.0,
                neutral: 0.2,
                bearish: 0.3,
            })
            .collect();
        let s = summarize(&rows).unwrap();

        assert_eq!(s.report_date, "2025-06-05");
        assert_eq!((s.bullish, s.bearish), (79.0, 30.0));
        assert_eq!(s.spread(), 49.0);

        let w = s.historical.week_ago.as_ref().unwrap();
        assert_eq!((w.date.as_str(), w.bullish, w.spread), ("2025-05-29", 78.0, 48.0));
        // 30 days back lands between weeks; the earlier week wins
        assert_eq!(s.historical.month_ago.as_ref().unwrap().date, "2025-05-01");

        // 52-week window is inclusive: weeks 7..=59 → 53 rows
        assert_eq!(s.historical_52w.bullish.len(), 53);
        assert_eq!((s.statistics_52w.bull_min, s.statistics_52w.bull_max), (27.0, 79.0));
        assert_eq!(s.statistics_52w.bull_avg, 53.0);
        assert_eq!(s.statistics_52w.bear_avg, 30.0);
        assert_eq!(s.statistics_52w.spread_min, -3.0);

        // full history: bullish mean = 49.5
        assert_eq!(s.bullish_avg, 49.5);
        assert_eq!(s.bull_vs_avg, 29.5);
        assert_eq!(s.spread_avg, 19.5);
        assert_eq!(s.spread_vs_avg, 29.5);
    }

    #[test]
    fn empty_history_has_no_summary() {
        assert!(summarize(&[]).is_none());
    }
}
