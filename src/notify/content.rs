// src/notify/content.rs
//! Daily alert body: template variables from the cached snapshots and
//! `{{key}}` substitution into the HTML and text templates.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::indicators::aaii::HistoricalPoint;
use crate::indicators::{AaiiSnapshot, FearGreedSnapshot};
use crate::llm::commentary::OverallAnalysis;
use crate::provider;
use crate::ssi::MonthlyIndicatorRecord;

pub const HTML_TEMPLATE: &str = "daily_alert.html";
pub const TEXT_TEMPLATE: &str = "daily_alert.txt";
pub const SSI_HISTORY_MONTHS: usize = 4;
const NO_HISTORY: &str = "No historical data available";

/// Variables holding pre-rendered markup; inserted into HTML unescaped.
const RAW_HTML_KEYS: &[&str] = &["ssi_history"];

pub type Variables = BTreeMap<&'static str, String>;

#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
    pub variables: Variables,
}

pub fn recommendation_class(rec: &str) -> String {
    rec.to_lowercase().replace(' ', "")
}

pub fn fng_class(score: f64) -> &'static str {
    match score {
        s if s < 25.0 => "fear-extreme",
        s if s < 45.0 => "fear",
        s if s < 55.0 => "neutral",
        s if s < 75.0 => "greed",
        _ => "greed-extreme",
    }
}

pub fn fng_description(score: f64) -> &'static str {
    match score {
        s if s < 25.0 => "Extreme fear - potential buying opportunity.",
        s if s < 45.0 => "Fear dominates - contrarian signal.",
        s if s < 55.0 => "Balanced sentiment.",
        s if s < 75.0 => "Greed building - caution advised.",
        _ => "Extreme greed - potential selling opportunity.",
    }
}

pub fn aaii_class(spread: f64) -> &'static str {
    match spread {
        s if s < -20.0 => "bearish",
        s if s < -10.0 => "fear",
        s if s < 10.0 => "neutral",
        s if s < 20.0 => "greed",
        _ => "bullish",
    }
}

pub fn aaii_description(spread: f64) -> &'static str {
    if spread > 15.0 {
        "Excessive bullishness - sell signal."
    } else if spread < -15.0 {
        "Excessive bearishness - buy signal."
    } else {
        "Balanced sentiment."
    }
}

pub fn ssi_class(level: f64) -> &'static str {
    match level {
        l if l < 50.0 => "bearish",
        l if l < 55.0 => "neutral",
        l if l < 60.0 => "bullish",
        _ => "extreme-bullish",
    }
}

/// (sentiment label, short description) for the latest SSI level.
pub fn ssi_sentiment(level: f64) -> (&'static str, &'static str) {
    match level {
        l if l < 50.0 => ("Bearish", "Sell-side analysts pessimistic - contrarian buy."),
        l if l < 55.0 => ("Neutral", "Balanced analyst sentiment."),
        l if l < 60.0 => ("Bullish", "Analysts optimistic - caution advised."),
        _ => ("Extreme Bullish", "Extreme optimism - contrarian sell signal."),
    }
}

/// Latest `limit` months, most recent first, as (html, text).
pub fn format_ssi_history(records: &[MonthlyIndicatorRecord], limit: usize) -> (String, String) {
    if records.is_empty() {
        return (NO_HISTORY.to_string(), NO_HISTORY.to_string());
    }
    let recent: Vec<&MonthlyIndicatorRecord> = records.iter().rev().take(limit).collect();

    let html = recent
        .iter()
        .map(|r| {
            format!(
                "<div class=\"ssi-row\"><div class=\"ssi-month\">{}</div><div class=\"ssi-value {}\">{:.1}%</div></div>",
                html_escape::encode_text(&r.date),
                ssi_class(r.level),
                r.level
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let text = recent
        .iter()
        .map(|r| format!("{}: {:.1}%", r.date, r.level))
        .collect::<Vec<_>>()
        .join("\n");
    (html, text)
}

/// Everything the templates can reference.
pub fn template_variables(
    fng: &FearGreedSnapshot,
    aaii: &AaiiSnapshot,
    ssi: &[MonthlyIndicatorRecord],
    overall: &OverallAnalysis,
    cfg: &AppConfig,
    now: DateTime<Local>,
) -> Variables {
    let mut v = Variables::new();

    v.insert("date", now.format("%m.%d.%y").to_string());
    v.insert("timestamp", now.format("%Y-%m-%d %H:%M:%S ET").to_string());

    v.insert("recommendation", overall.recommendation.clone());
    v.insert("recommendation_class", recommendation_class(&overall.recommendation));
    v.insert("commentary", overall.commentary.clone());

    let score = fng.score.unwrap_or(0.0);
    v.insert("fng_score", format!("{:.0}", score.round()));
    v.insert("fng_rating", fng.rating.clone().unwrap_or_else(|| "Unknown".into()));
    v.insert("fng_class", fng_class(score).into());
    v.insert("fng_description", fng_description(score).into());
    v.insert("fng_1d_ago", format!("{:.0}", fng.previous_close.unwrap_or(0.0).round()));
    v.insert("fng_1w_ago", format!("{:.0}", fng.previous_1_week.unwrap_or(0.0).round()));

    let spread = aaii.bullish - aaii.bearish;
    let past = |p: &Option<HistoricalPoint>| p.as_ref().map_or(0.0, |p| p.spread);
    v.insert("aaii_bullish", format!("{:.1}", aaii.bullish));
    v.insert("aaii_bearish", format!("{:.1}", aaii.bearish));
    v.insert("aaii_spread", format!("{spread:+.1}"));
    v.insert("aaii_class", aaii_class(spread).into());
    v.insert("aaii_description", aaii_description(spread).into());
    v.insert("aaii_1w_ago", format!("{:+.1}", past(&aaii.historical.week_ago)));
    v.insert("aaii_1m_ago", format!("{:+.1}", past(&aaii.historical.month_ago)));

    let (level, month, sentiment, description) = match ssi.last() {
        Some(r) => {
            let (s, d) = ssi_sentiment(r.level);
            (r.level, r.date.clone(), s, d)
        }
        None => (0.0, "Unknown".to_string(), "Unknown", "SSI data not available."),
    };
    let (history_html, history_text) = if ssi.is_empty() {
        (String::new(), String::new())
    } else {
        format_ssi_history(ssi, SSI_HISTORY_MONTHS)
    };
    v.insert("ssi_latest_value", format!("{level:.1}"));
    v.insert("ssi_latest_month", month);
    v.insert("ssi_sentiment", sentiment.into());
    v.insert("ssi_class", ssi_class(level).into());
    v.insert("ssi_description", description.into());
    v.insert("ssi_history", history_html);
    v.insert("ssi_history_text", history_text);

    v.insert("dashboard_url", cfg.dashboard.url.clone());
    v.insert("unsubscribe_url", cfg.dashboard.unsubscribe_url());
    v
}

/// Replace each `{{key}}`. With `escape_html`, values are HTML-escaped
/// except pre-rendered markup. Unknown placeholders are left in place.
pub fn render(template: &str, vars: &Variables, escape_html: bool) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{{{key}}}}}");
        if !out.contains(&placeholder) {
            continue;
        }
        let value = if escape_html && !RAW_HTML_KEYS.contains(key) {
            html_escape::encode_text(value).into_owned()
        } else {
            value.clone()
        };
        out = out.replace(&placeholder, &value);
    }
    out
}

pub fn subject(vars: &Variables) -> String {
    format!(
        "Daily Market Sentiment Report {} - {} Signal",
        vars.get("date").map(String::as_str).unwrap_or_default(),
        vars.get("recommendation").map(String::as_str).unwrap_or("HOLD")
    )
}

/// Point the unsubscribe link at one recipient (`?email=...`).
pub fn personalize(content: &EmailContent, recipient: &str) -> EmailContent {
    let mut out = content.clone();
    let Some(base) = content.variables.get("unsubscribe_url").filter(|u| !u.is_empty()) else {
        return out;
    };
    let Ok(url) = reqwest::Url::parse_with_params(base, &[("email", recipient)]) else {
        return out;
    };
    let escaped_base = html_escape::encode_text(base);
    let escaped_url = html_escape::encode_text(url.as_str());
    out.html = out.html.replace(escaped_base.as_ref(), escaped_url.as_ref());
    out.text = out.text.replace(base.as_str(), url.as_str());
    out.variables.insert("unsubscribe_url", url.to_string());
    out
}

fn load_template(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    fs::read_to_string(&path).with_context(|| format!("Template file not found: {}", path.display()))
}

/// Build the full email from the caches. Fails when F&G or AAII is missing.
pub fn generate(cfg: &AppConfig) -> Result<EmailContent> {
    let fng = provider::fear_greed(cfg).map_err(|e| anyhow!("Fear & Greed data error: {e}"))?;
    let aaii = provider::aaii_sentiment(cfg).map_err(|e| anyhow!("AAII data error: {e}"))?;
    let ssi = provider::ssi_records(cfg).unwrap_or_default();
    let overall = provider::overall_analysis(cfg);
    generate_from(cfg, &fng, &aaii, &ssi, &overall, Local::now())
}

pub fn generate_from(
    cfg: &AppConfig,
    fng: &FearGreedSnapshot,
    aaii: &AaiiSnapshot,
    ssi: &[MonthlyIndicatorRecord],
    overall: &OverallAnalysis,
    now: DateTime<Local>,
) -> Result<EmailContent> {
    let html_tpl = load_template(&cfg.paths.templates_dir, HTML_TEMPLATE)?;
    let text_tpl = load_template(&cfg.paths.templates_dir, TEXT_TEMPLATE)?;
    let variables = template_variables(fng, aaii, ssi, overall, cfg, now);
    Ok(EmailContent {
        subject: subject(&variables),
        html: render(&html_tpl, &variables, true),
        text: render(&text_tpl, &variables, false),
        variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssi::Confidence;

    fn rec(date: &str, level: f64) -> MonthlyIndicatorRecord {
        MonthlyIndicatorRecord {
            level,
            date: date.into(),
            source_url: "https://example.com".into(),
            confidence: Confidence::High,
            context: "ctx".into(),
            reasoning: String::new(),
            source: None,
            updated_at: None,
        }
    }

    #[test]
    fn class_thresholds() {
        assert_eq!(fng_class(24.9), "fear-extreme");
        assert_eq!(fng_class(25.0), "fear");
        assert_eq!(fng_class(54.9), "neutral");
        assert_eq!(fng_class(75.0), "greed-extreme");
        assert_eq!(aaii_class(-20.5), "bearish");
        assert_eq!(aaii_class(-10.0), "neutral");
        assert_eq!(aaii_class(19.9), "greed");
        assert_eq!(aaii_description(15.1), "Excessive bullishness - sell signal.");
        assert_eq!(aaii_description(15.0), "Balanced sentiment.");
        assert_eq!(ssi_class(49.9), "bearish");
        assert_eq!(ssi_class(60.0), "extreme-bullish");
        assert_eq!(ssi_sentiment(57.0).0, "Bullish");
        assert_eq!(recommendation_class("STRONG BUY"), "strongbuy");
    }

    #[test]
    fn history_is_latest_four_newest_first() {
        let records: Vec<_> = (1..=6).map(|m| rec(&format!("2025-0{m}"), 50.0 + m as f64)).collect();
        let (html, text) = format_ssi_history(&records, SSI_HISTORY_MONTHS);
        assert_eq!(text, "2025-06: 56.0%\n2025-05: 55.0%\n2025-04: 54.0%\n2025-03: 53.0%");
        assert_eq!(html.matches("ssi-row").count(), 4);
        assert!(html.contains("ssi-value bullish\">56.0%"));

        let (h, t) = format_ssi_history(&[], 4);
        assert_eq!(h, NO_HISTORY);
        assert_eq!(t, NO_HISTORY);
    }

    #[test]
    fn render_escapes_html_values_only() {
        let mut vars = Variables::new();
        vars.insert("commentary", "Risk <on> & rising".into());
        vars.insert("ssi_history", "<div>raw</div>".into());
        let tpl = "{{commentary}}|{{ssi_history}}|{{missing}}";
        assert_eq!(
            render(tpl, &vars, true),
            "Risk &lt;on&gt; &amp; rising|<div>raw</div>|{{missing}}"
        );
        assert_eq!(render(tpl, &vars, false), "Risk <on> & rising|<div>raw</div>|{{missing}}");
    }

    #[test]
    fn personalized_unsubscribe_link() {
        let mut vars = Variables::new();
        vars.insert("unsubscribe_url", "https://dash.example.com/unsubscribe".into());
        let base = EmailContent {
            subject: "s".into(),
            html: "<a href=\"https://dash.example.com/unsubscribe\">Unsubscribe</a>".into(),
            text: "Unsubscribe: https://dash.example.com/unsubscribe".into(),
            variables: vars,
        };
        let p = personalize(&base, "a+b@x.com");
        assert_eq!(p.text, "Unsubscribe: https://dash.example.com/unsubscribe?email=a%2Bb%40x.com");
        assert!(p.html.contains("unsubscribe?email=a%2Bb%40x.com\""));
        assert!(base.text.ends_with("/unsubscribe"));
    }

    #[test]
    fn subject_line() {
        let mut vars = Variables::new();
        vars.insert("date", "06.15.25".into());
        vars.insert("recommendation", "BUY".into());
        assert_eq!(subject(&vars), "Daily Market Sentiment Report 06.15.25 - BUY Signal");
    }

    #[test]
    fn variables_from_snapshots() {
        use crate::indicators::aaii::{summarize, AaiiRow};
        use chrono::{NaiveDate, TimeZone};

        let fng = FearGreedSnapshot::from_graphdata(&serde_json::json!({
            "fear_and_greed": {"score": 22.6, "rating": "extreme fear", "previous_close": 30.4, "previous_1_week": 41.5}
        }))
        .unwrap();
        let row = |d: u32, bull: f64, bear: f64| AaiiRow {
            date: NaiveDate::from_ymd_opt(2025, 6, d).unwrap(),
            bullish: bull,
            neutral: 1.0 - bull - bear,
            bearish: bear,
        };
        let aaii = summarize(&[row(5, 0.30, 0.40), row(12, 0.25, 0.45)]).unwrap();
        let overall = OverallAnalysis { recommendation: "STRONG BUY".into(), commentary: "Fear is extreme.".into() };
        let mut cfg = AppConfig::default();
        cfg.dashboard.url = "https://dash.example.com/".into();
        let now = Local.with_ymd_and_hms(2025, 6, 15, 7, 30, 0).unwrap();

        let v = template_variables(&fng, &aaii, &[rec("2025-03", 55.7)], &overall, &cfg, now);
        assert_eq!(v["date"], "06.15.25");
        assert_eq!(v["timestamp"], "2025-06-15 07:30:00 ET");
        assert_eq!(v["recommendation_class"], "strongbuy");
        assert_eq!(v["fng_score"], "23");
        assert_eq!(v["fng_class"], "fear-extreme");
        assert_eq!(v["fng_1d_ago"], "30");
        assert_eq!(v["aaii_spread"], "-20.0");
        assert_eq!(v["aaii_class"], "fear");
        assert_eq!(v["aaii_description"], "Excessive bearishness - buy signal.");
        assert_eq!(v["ssi_latest_value"], "55.7");
        assert_eq!(v["ssi_sentiment"], "Bullish");
        assert_eq!(v["ssi_history_text"], "2025-03: 55.7%");
        assert_eq!(v["unsubscribe_url"], "https://dash.example.com/unsubscribe");

        let none = template_variables(&fng, &aaii, &[], &overall, &cfg, now);
        assert_eq!(none["ssi_description"], "SSI data not available.");
        assert_eq!(none["ssi_history"], "");
    }
}
