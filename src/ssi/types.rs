// src/ssi/types.rs
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Model-reported certainty for an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    /// Unknown or missing labels fall back to `Medium`.
    pub fn parse_lenient(s: Option<&str>) -> Self {
        s.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence '{other}'")),
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// Any present value is accepted; labels other than low/medium/high read as `Medium`.
impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(d)?;
        Ok(Confidence::parse_lenient(raw.as_str()))
    }
}

/// One validated SSI reading for a calendar month, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyIndicatorRecord {
    pub level: f64,
    /// Month key, `YYYY-MM`.
    pub date: String,
    #[serde(rename = "url", alias = "source_url")]
    pub source_url: String,
    pub confidence: Confidence,
    pub context: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// One organic result from the search API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub displayed_link: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source: String,
    /// The relative date string ("3 days ago") before normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedArticle {
    pub title: String,
    pub date: String,
    pub link: String,
    pub full_text: String,
    pub text_length: usize,
    pub extraction_success: bool,
}

/// A value the model found in one article, after range validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Human month label, e.g. "May 2024".
    pub month: String,
    pub level: f64,
    pub confidence: Confidence,
    pub context: String,
    pub reasoning: String,
    pub source_url: String,
    pub source_title: String,
    pub source_date: String,
}

/// A model answer that failed validation; kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedResult {
    pub month: Option<String>,
    pub value: Option<f64>,
    pub reason: String,
    pub source_url: String,
    pub source_title: String,
}

/// Raw page as returned by a fetcher, before decoding.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_encoding: Option<String>,
    pub body: Vec<u8>,
}

/// One page of organic results from a search backend.
#[async_trait::async_trait]
pub trait SearchApi: Send + Sync {
    async fn organic_results(&self, query: &str, start: u32) -> Result<Vec<SearchResult>>;
    fn name(&self) -> &'static str;
}

/// HTTP access used by the scraper. Implementations keep cookies between calls.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Visit the site's homepage once to establish a session. Best-effort.
    async fn warm_up(&self) -> Result<()>;
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}
