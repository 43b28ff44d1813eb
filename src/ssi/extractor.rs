// src/ssi/extractor.rs
//! LLM-backed extraction of SSI readings from article text.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SsiSettings;
use crate::llm::{ChatRequest, DynChat};
use crate::pacing::Pacer;
use crate::ssi::types::{Confidence, DiscardedResult, ExtractionResult, ScrapedArticle};

pub const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED - Content exceeds token limit]";

const SYSTEM_PROMPT: &str = r#"You are a financial data extraction specialist with expertise in Bank of America research and sell-side indicators.

Your task: Extract Bank of America Sell-Side Indicator (SSI) values from complete investing.com articles.

ABOUT THE SSI:
- The SSI measures average recommended equity allocation from sell-side strategists
- Typical range: 40-80%
- It's a contrarian sentiment indicator
- Published monthly by Bank of America

CRITICAL TIMING RULE: SSI data for month N is published in month N+1. Examples:
- May 2024 SSI data appears in June 2024 articles
- December 2024 SSI data appears in January 2025 articles

EXTRACTION GUIDELINES:
1. Read the complete article carefully
2. Look for specific phrases: "Sell-Side Indicator", "SSI", "recommended equity allocation"
3. Distinguish the SSI from other Bank of America indicators such as the Fund Manager Survey
4. Identify the exact percentage value (e.g., 55.7%)
5. Determine which month the SSI value refers to (not the publication month)
6. Include supporting context from the article

Return ONLY a valid JSON object with no additional text."#;

/// Cut `text` to `max_chars` characters, appending [`TRUNCATION_MARKER`] when shortened.
pub fn truncate_article(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            debug!(target: "ssi", from = text.chars().count(), to = max_chars, "article truncated");
            format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER)
        }
        None => text.to_string(),
    }
}

pub fn user_prompt(article: &ScrapedArticle, body: &str, targets: &[String], today: NaiveDate) -> String {
    format!(
        r#"CONTEXT: Today's date is {today}. You are analyzing financial articles to extract Bank of America Sell-Side Indicator (SSI) data.

ARTICLE METADATA:
Title: {title}
Publication Date: {date}
URL: {link}
Content Length: {len} characters

TARGET MONTHS: {months}

FULL ARTICLE TEXT:
{body}

EXTRACTION TASK:
1. Identify any Bank of America Sell-Side Indicator (SSI) values
2. Determine which specific month each SSI value refers to
3. Consider the publication timing (article published in month N+1 for month N data)
4. Extract the percentage value and provide context

Return a JSON object with this format:
{{
  "results": [
    {{
      "month": "May 2024",
      "value": 55.7,
      "confidence": "high",
      "context": "brief supporting quote from article",
      "reasoning": "why this value corresponds to this month"
    }}
  ]
}}

If no SSI values found, return {{"results": []}}.
Only include values in the 40-80% range that clearly refer to the SSI."#,
        today = today.format("%B %d, %Y"),
        title = article.title,
        date = article.date,
        link = article.link,
        len = body.chars().count(),
        months = targets.join(", "),
    )
}

/// One entry of the model's `results` array, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEntry {
    pub month: Option<Value>,
    pub value: Option<Value>,
    pub confidence: Option<Value>,
    pub context: Option<Value>,
    pub reasoning: Option<Value>,
}

fn as_text(v: &Option<Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers, or strings such as "55.7%".
fn as_number(v: &Option<Value>) -> Option<f64> {
    match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted(ExtractionResult),
    Discarded(DiscardedResult),
}

/// Month present, value present, `min <= value <= max`.
pub fn validate(raw: &RawEntry, article: &ScrapedArticle, min: f64, max: f64) -> Validation {
    let month = as_text(&raw.month);
    let value = as_number(&raw.value);
    let discard = |reason: String| {
        Validation::Discarded(DiscardedResult {
            month: month.clone(),
            value,
            reason,
            source_url: article.link.clone(),
            source_title: article.title.clone(),
        })
    };

    let Some(m) = month.clone() else {
        return discard("Missing month".into());
    };
    let Some(v) = value else {
        return discard("Missing value".into());
    };
    if !(min..=max).contains(&v) {
        return discard(format!("Value {v}% outside valid range ({min}-{max}%)"));
    }

    Validation::Accepted(ExtractionResult {
        month: m,
        level: v,
        confidence: Confidence::parse_lenient(as_text(&raw.confidence).as_deref()),
        context: as_text(&raw.context).unwrap_or_default(),
        reasoning: as_text(&raw.reasoning).unwrap_or_default(),
        source_url: article.link.clone(),
        source_title: article.title.clone(),
        source_date: article.date.clone(),
    })
}

/// Entries of a `{"results": [...]}` answer; non-object entries are skipped.
pub fn parse_results(content: &str) -> Result<Vec<RawEntry>> {
    let v: Value = serde_json::from_str(content).context("model answer is not JSON")?;
    let entries = v
        .get("results")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter(|e| e.is_object())
                .filter_map(|e| serde_json::from_value(e.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    Ok(entries)
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub valid: Vec<ExtractionResult>,
    /// Articles whose model call and JSON parse both succeeded.
    pub processed: usize,
    pub discarded: Vec<DiscardedResult>,
}

pub struct ValueExtractor {
    chat: DynChat,
    max_chars: usize,
    max_tokens: u32,
    level_min: f64,
    level_max: f64,
    pacer: Pacer,
}

impl ValueExtractor {
    pub fn new(chat: DynChat, settings: &SsiSettings) -> Self {
        Self {
            chat,
            max_chars: settings.max_article_chars,
            max_tokens: settings.extract_max_tokens,
            level_min: settings.level_min,
            level_max: settings.level_max,
            pacer: settings.pacing.extract(),
        }
    }

    async fn extract_one(
        &self,
        article: &ScrapedArticle,
        targets: &[String],
        today: NaiveDate,
    ) -> Result<Vec<Validation>> {
        let body = truncate_article(&article.full_text, self.max_chars);
        let req = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: user_prompt(article, &body, targets, today),
            temperature: 0.0,
            max_tokens: self.max_tokens,
            json_object: true,
        };
        let content = self.chat.complete(&req).await?;
        debug!(target: "ssi", preview = %crate::llm::truncate_chars(&content, 100), "model answer");
        let entries = parse_results(&content)?;
        Ok(entries
            .iter()
            .map(|e| validate(e, article, self.level_min, self.level_max))
            .collect())
    }

    /// Articles are processed one at a time; a failure on one article is
    /// logged and the batch continues.
    pub async fn extract_all(
        &mut self,
        articles: &[ScrapedArticle],
        targets: &[String],
        today: NaiveDate,
    ) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        if articles.is_empty() {
            warn!(target: "ssi", "no scraped articles to process");
            return report;
        }
        info!(target: "ssi", articles = articles.len(), model = self.chat.name(), "extracting SSI values");
        self.pacer.reset();

        for (i, article) in articles.iter().enumerate() {
            self.pacer.wait().await;
            match self.extract_one(article, targets, today).await {
                Ok(validations) => {
                    report.processed += 1;
                    if validations.is_empty() {
                        debug!(target: "ssi", n = i + 1, "no SSI values in article");
                    }
                    for v in validations {
                        match v {
                            Validation::Accepted(x) => {
                                info!(target: "ssi", month = %x.month, level = x.level, confidence = %x.confidence, "found SSI value");
                                report.valid.push(x);
                            }
                            Validation::Discarded(d) => {
                                debug!(target: "ssi", reason = %d.reason, "discarded model entry");
                                report.discarded.push(d);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "ssi", n = i + 1, url = %article.link, error = ?e, "extraction failed for article");
                    counter!("ssi_extraction_errors_total").increment(1);
                }
            }
        }

        counter!("ssi_extractions_total").increment(report.valid.len() as u64);
        counter!("ssi_discards_total").increment(report.discarded.len() as u64);
        info!(
            target: "ssi",
            valid = report.valid.len(),
            processed = report.processed,
            discarded = report.discarded.len(),
            "extraction complete"
        );
        report
    }
}
