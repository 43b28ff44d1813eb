// src/ssi/scraper.rs
//! Article download + text extraction.
//!
//! `HttpFetcher` is the production `PageFetcher`: one cookie-keeping reqwest
//! client, browser-like headers with a rotating user agent. gzip bodies are
//! left compressed by the client and inflated here; brotli/deflate are
//! handled inside reqwest.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use metrics::counter;
use rand::seq::IndexedRandom;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SsiSettings;
use crate::pacing::Pacer;
use crate::ssi::readability::extract_main_text;
use crate::ssi::types::{FetchedPage, PageFetcher, ScrapedArticle, SearchResult};

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
    homepage: String,
    warmup_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &SsiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .build()
            .context("building article http client")?;
        Ok(Self {
            client,
            user_agents: settings.user_agents.clone(),
            homepage: settings.homepage_url.clone(),
            warmup_timeout: Duration::from_secs(settings.warmup_timeout_secs),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        let ua = self
            .user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or("Mozilla/5.0");
        if let Ok(v) = HeaderValue::from_str(ua) {
            h.insert(header::USER_AGENT, v);
        }
        h.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        h.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        h.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        h.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        h.insert(header::DNT, HeaderValue::from_static("1"));
        if let Ok(v) = HeaderValue::from_str(&self.homepage) {
            h.insert(header::REFERER, v);
        }
        h
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn warm_up(&self) -> Result<()> {
        self.client
            .get(&self.homepage)
            .headers(self.headers())
            .timeout(self.warmup_timeout)
            .send()
            .await
            .context("homepage request")?
            .error_for_status()
            .context("homepage non-2xx")?;
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let resp = self
            .client
            .get(url)
            .headers(self.headers())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status().as_u16();
        let content_encoding = resp
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.context("reading article body")?.to_vec();
        Ok(FetchedPage {
            status,
            content_encoding,
            body,
        })
    }
}

fn gunzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(body).read_to_end(&mut out)?;
    Ok(out)
}

/// UTF-8 first, Latin-1 as a lossless fallback.
fn bytes_to_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// At least 80% of the first 100 characters are printable.
pub fn looks_printable(text: &str) -> bool {
    let head: Vec<char> = text.chars().take(100).collect();
    if head.is_empty() {
        return true;
    }
    let printable = head
        .iter()
        .filter(|c| (!c.is_control() || c.is_whitespace()) && **c != '\u{FFFD}')
        .count();
    printable as f64 / head.len() as f64 >= 0.8
}

/// Turn a fetched body into text according to its content-encoding.
pub fn decode_body(body: &[u8], content_encoding: Option<&str>) -> String {
    let encoding = content_encoding.map(|e| e.trim().to_ascii_lowercase());
    let inflated;
    let bytes: &[u8] = match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => match gunzip(body) {
            Ok(v) => {
                inflated = v;
                &inflated
            }
            Err(e) => {
                warn!(target: "ssi", error = %e, "gzip decode failed, using raw body");
                body
            }
        },
        _ => body,
    };

    let text = bytes_to_text(bytes);
    if looks_printable(&text) {
        return text;
    }
    debug!(target: "ssi", "decoded body looks binary, retrying as lossy utf-8");
    String::from_utf8_lossy(bytes).replace('\u{FFFD}', "")
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArticleOutcome {
    Scraped(ScrapedArticle),
    /// Every attempt failed at the HTTP level or returned a stub page.
    DownloadFailed { reason: String },
    /// Page downloaded but too little readable text survived.
    ExtractionFailed { chars: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeTally {
    pub attempted: usize,
    pub succeeded: usize,
    pub download_failures: usize,
    pub extraction_failures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub articles: Vec<ScrapedArticle>,
    pub tally: ScrapeTally,
}

pub struct ArticleScraper {
    fetcher: Box<dyn PageFetcher>,
    max_articles: Option<usize>,
    max_attempts: u32,
    min_html_bytes: usize,
    min_article_chars: usize,
    scrape_pacer: Pacer,
    retry_pacer: Pacer,
    warmup_pacer: Pacer,
    warmed_up: bool,
}

impl ArticleScraper {
    pub fn new(fetcher: Box<dyn PageFetcher>, settings: &SsiSettings) -> Self {
        Self {
            fetcher,
            max_articles: settings.max_articles,
            max_attempts: settings.max_attempts.max(1),
            min_html_bytes: settings.min_html_bytes,
            min_article_chars: settings.min_article_chars,
            scrape_pacer: settings.pacing.scrape(),
            retry_pacer: settings.pacing.retry(),
            warmup_pacer: settings.pacing.warmup(),
            warmed_up: false,
        }
    }

    /// One homepage visit per scraper; failure is logged and not retried.
    async fn ensure_warm(&mut self) {
        if self.warmed_up {
            return;
        }
        self.warmed_up = true;
        match self.fetcher.warm_up().await {
            Ok(()) => debug!(target: "ssi", "session warm-up ok"),
            Err(e) => warn!(target: "ssi", error = ?e, "session warm-up failed, continuing without it"),
        }
        self.warmup_pacer.wait().await;
    }

    async fn download(&mut self, url: &str) -> Result<String> {
        let mut last_err = String::from("no attempts made");
        self.retry_pacer.reset();
        for attempt in 1..=self.max_attempts {
            let slept = self.retry_pacer.wait().await;
            if attempt > 1 {
                debug!(target: "ssi", url, attempt, backoff_ms = slept.as_millis() as u64, "retrying download");
            }
            match self.fetcher.fetch(url).await {
                Ok(page) if page.status == 200 => {
                    let html = decode_body(&page.body, page.content_encoding.as_deref());
                    if html.len() < self.min_html_bytes {
                        last_err = format!("response too small ({} bytes)", html.len());
                        warn!(target: "ssi", url, attempt, bytes = html.len(), "page suspiciously small");
                        continue;
                    }
                    return Ok(html);
                }
                Ok(page) => {
                    last_err = format!("HTTP {}", page.status);
                    warn!(target: "ssi", url, attempt, status = page.status, "non-200 response");
                }
                Err(e) => {
                    last_err = format!("{e:#}");
                    warn!(target: "ssi", url, attempt, error = %last_err, "request failed");
                }
            }
        }
        Err(anyhow!(last_err))
    }

    pub async fn scrape_one(&mut self, result: &SearchResult) -> ArticleOutcome {
        self.ensure_warm().await;
        self.scrape_pacer.wait().await;

        let html = match self.download(&result.link).await {
            Ok(h) => h,
            Err(e) => {
                return ArticleOutcome::DownloadFailed {
                    reason: e.to_string(),
                }
            }
        };
        match extract_main_text(&html, Some(&result.link), self.min_article_chars) {
            Some(full_text) => ArticleOutcome::Scraped(ScrapedArticle {
                title: result.title.clone(),
                date: result.date.clone(),
                link: result.link.clone(),
                text_length: full_text.chars().count(),
                full_text,
                extraction_success: true,
            }),
            None => ArticleOutcome::ExtractionFailed {
                chars: html.len(),
            },
        }
    }

    pub async fn scrape_all(&mut self, results: &[SearchResult]) -> ScrapeReport {
        let limit = self.max_articles.unwrap_or(results.len()).min(results.len());
        info!(target: "ssi", articles = limit, "scraping article content");
        let mut report = ScrapeReport::default();

        for (i, result) in results.iter().take(limit).enumerate() {
            report.tally.attempted += 1;
            match self.scrape_one(result).await {
                ArticleOutcome::Scraped(article) => {
                    debug!(target: "ssi", n = i + 1, chars = article.text_length, url = %article.link, "article scraped");
                    report.tally.succeeded += 1;
                    report.articles.push(article);
                }
                ArticleOutcome::DownloadFailed { reason } => {
                    warn!(target: "ssi", n = i + 1, url = %result.link, reason = %reason, "article download abandoned");
                    counter!("ssi_scrape_failures_total", "kind" => "download").increment(1);
                    report.tally.download_failures += 1;
                }
                ArticleOutcome::ExtractionFailed { chars } => {
                    warn!(target: "ssi", n = i + 1, url = %result.link, html_chars = chars, "no readable text in article");
                    counter!("ssi_scrape_failures_total", "kind" => "extraction").increment(1);
                    report.tally.extraction_failures += 1;
                }
            }
        }

        counter!("ssi_articles_scraped_total").increment(report.tally.succeeded as u64);
        info!(
            target: "ssi",
            succeeded = report.tally.succeeded,
            download_failures = report.tally.download_failures,
            extraction_failures = report.tally.extraction_failures,
            "scraping complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn article_html() -> String {
        let para = "Bank of America's Sell Side Indicator rose to 55.7% in March, its highest reading in over three years. ";
        format!("<html><body><article><p>{}</p><p>{}</p></article></body></html>", para.repeat(8), para.repeat(4))
    }

    fn ok_page(body: &str) -> FetchedPage {
        FetchedPage {
            status: 200,
            content_encoding: None,
            body: body.as_bytes().to_vec(),
        }
    }

    #[derive(Clone, Default)]
    struct Script {
        responses: Arc<Mutex<VecDeque<Result<FetchedPage, String>>>>,
        warmups: Arc<Mutex<u32>>,
        fetches: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl PageFetcher for Script {
        async fn warm_up(&self) -> Result<()> {
            *self.warmups.lock().unwrap() += 1;
            Err(anyhow!("homepage blocked"))
        }
        async fn fetch(&self, _url: &str) -> Result<FetchedPage> {
            *self.fetches.lock().unwrap() += 1;
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(p)) => Ok(p),
                Some(Err(e)) => Err(anyhow!(e)),
                None => Err(anyhow!("unexpected fetch")),
            }
        }
    }

    fn settings() -> SsiSettings {
        SsiSettings {
            pacing: PacingConfig::disabled(),
            ..SsiSettings::default()
        }
    }

    fn result(link: &str) -> SearchResult {
        SearchResult {
            title: "BofA SSI".into(),
            link: link.into(),
            date: "Mar 12, 2025".into(),
            ..SearchResult::default()
        }
    }

    #[test]
    fn gzip_bodies_are_inflated() {
        let html = article_html();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(html.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();
        assert_eq!(decode_body(&gz, Some("gzip")), html);
        assert_eq!(decode_body(html.as_bytes(), None), html);
    }

    #[test]
    fn latin1_fallback_and_printable_check() {
        assert_eq!(decode_body(b"caf\xe9 au lait", None), "café au lait");
        assert!(looks_printable("plain text\nwith newline"));
        assert!(!looks_printable("\u{1}\u{2}\u{3}\u{4}\u{5}abc"));
    }

    #[tokio::test]
    async fn retries_once_then_succeeds_and_warms_up_once() {
        let script = Script::default();
        script.responses.lock().unwrap().extend([
            Ok(FetchedPage { status: 503, content_encoding: None, body: vec![] }),
            Ok(ok_page(&article_html())),
            Ok(ok_page(&article_html())),
        ]);
        let mut scraper = ArticleScraper::new(Box::new(script.clone()), &settings());
        let report = scraper.scrape_all(&[result("https://a"), result("https://b")]).await;

        assert_eq!(report.tally.succeeded, 2);
        assert_eq!(report.articles[0].link, "https://a");
        assert!(report.articles[0].full_text.contains("55.7%"));
        assert_eq!(*script.warmups.lock().unwrap(), 1);
        assert_eq!(*script.fetches.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn stub_pages_and_thin_text_are_counted_separately() {
        let script = Script::default();
        let thin = format!("<html><body><p>Subscribe to continue.</p>{}</body></html>", " ".repeat(1200));
        script.responses.lock().unwrap().extend([
            Ok(ok_page("<html>blocked</html>")),
            Err("connection reset".to_string()),
            Ok(ok_page(&thin)),
        ]);
        let mut scraper = ArticleScraper::new(Box::new(script.clone()), &settings());
        let report = scraper.scrape_all(&[result("https://a"), result("https://b")]).await;

        assert!(report.articles.is_empty());
        assert_eq!(
            report.tally,
            ScrapeTally { attempted: 2, succeeded: 0, download_failures: 1, extraction_failures: 1 }
        );
    }

    /// Every fetch takes `work` of (virtual) time; the first one fails.
    struct Slow {
        work: Duration,
        starts: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    #[async_trait]
    impl PageFetcher for Slow {
        async fn warm_up(&self) -> Result<()> {
            Ok(())
        }
        async fn fetch(&self, _url: &str) -> Result<FetchedPage> {
            let first = {
                let mut starts = self.starts.lock().unwrap();
                starts.push(tokio::time::Instant::now());
                starts.len() == 1
            };
            tokio::time::sleep(self.work).await;
            if first {
                Err(anyhow!("timed out"))
            } else {
                Ok(ok_page(&article_html()))
            }
        }
    }

    fn gaps(starts: &Mutex<Vec<tokio::time::Instant>>) -> Vec<Duration> {
        let starts = starts.lock().unwrap();
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_is_added_after_a_slow_failure() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let fetcher = Slow { work: Duration::from_secs(30), starts: starts.clone() };
        let s = SsiSettings {
            pacing: PacingConfig { retry_min_ms: 2_000, retry_max_ms: 4_000, ..PacingConfig::disabled() },
            ..settings()
        };
        let mut scraper = ArticleScraper::new(Box::new(fetcher), &s);
        let report = scraper.scrape_all(&[result("https://a")]).await;

        assert_eq!(report.tally.succeeded, 1);
        let gaps = gaps(&starts);
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0] >= Duration::from_secs(32) && gaps[0] <= Duration::from_secs(34), "{gaps:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn article_delay_is_added_after_a_slow_scrape() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let fetcher = Slow { work: Duration::from_secs(5), starts: starts.clone() };
        let s = SsiSettings {
            max_attempts: 1,
            pacing: PacingConfig { scrape_min_ms: 1_000, scrape_max_ms: 1_000, ..PacingConfig::disabled() },
            ..settings()
        };
        let mut scraper = ArticleScraper::new(Box::new(fetcher), &s);
        let t0 = tokio::time::Instant::now();
        let report = scraper.scrape_all(&[result("https://a"), result("https://b")]).await;

        assert_eq!(report.tally.download_failures, 1);
        assert_eq!(report.tally.succeeded, 1);
        let starts_at_1s = starts.lock().unwrap()[0] - t0;
        assert_eq!(starts_at_1s, Duration::from_secs(1));
        assert_eq!(gaps(&starts), vec![Duration::from_secs(6)]);
    }

    #[tokio::test]
    async fn max_articles_caps_the_batch() {
        let script = Script::default();
        script.responses.lock().unwrap().push_back(Ok(ok_page(&article_html())));
        let s = SsiSettings { max_articles: Some(1), ..settings() };
        let mut scraper = ArticleScraper::new(Box::new(script.clone()), &s);
        let report = scraper.scrape_all(&[result("https://a"), result("https://b")]).await;
        assert_eq!(report.tally.attempted, 1);
        assert_eq!(*script.fetches.lock().unwrap(), 1);
    }
}
