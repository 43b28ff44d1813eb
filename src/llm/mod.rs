// src/llm/mod.rs
//! Chat-completion client: provider abstraction + file cache + daily limit.

pub mod commentary;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::LlmConfig;

pub use commentary::Commentator;

/// One system + user exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the model for a JSON object (`response_format = json_object`).
    pub json_object: bool,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Assistant message text for `req`, trimmed.
    async fn complete(&self, req: &ChatRequest) -> Result<String>;
    fn name(&self) -> &'static str;
    fn is_enabled(&self) -> bool {
        true
    }
}

pub type DynChat = Arc<dyn ChatModel>;

/// OpenAI Chat Completions.
pub struct OpenAiChat {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(cfg: &LlmConfig) -> Result<Self> {
        let api_key = cfg
            .api_key()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not configured"))?
            .to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("market-sentiment-terminal/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building llm http client")?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key,
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            response_format: Option<ResponseFormat>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &req.system,
                },
                Msg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_object.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("chat completion returned {status}: {}", truncate_chars(&text, 200));
        }
        let parsed: Resp = resp.json().await.context("decoding chat completion")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            bail!("chat completion returned no content");
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Used when no key is configured; every call fails fast.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    async fn complete(&self, _req: &ChatRequest) -> Result<String> {
        bail!("llm disabled")
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
}

/// Real client when configured, [`DisabledChat`] otherwise.
pub fn build_chat(cfg: &LlmConfig) -> DynChat {
    if !cfg.is_enabled() {
        return Arc::new(DisabledChat);
    }
    match OpenAiChat::new(cfg) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            warn!(target: "llm", error = ?e, "could not build llm client, disabling");
            Arc::new(DisabledChat)
        }
    }
}

/// [`build_chat`] wrapped with the response cache and daily limit.
pub fn build_cached_chat(cfg: &LlmConfig, cache_dir: PathBuf) -> DynChat {
    let inner = build_chat(cfg);
    if !inner.is_enabled() {
        return inner;
    }
    Arc::new(CachingChat::new(inner, cache_dir, cfg.daily_limit))
}

// ------------------------------------------------------------
// Caching wrapper (file cache + daily limit)
// ------------------------------------------------------------

pub struct CachingChat {
    inner: DynChat,
    cache_dir: PathBuf,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl CachingChat {
    pub fn new(inner: DynChat, cache_dir: PathBuf, daily_limit: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(target: "llm", error = %e, dir = %cache_dir.display(), "cannot create llm cache dir");
        }
        let counter = Mutex::new(load_daily_counter(&cache_dir).unwrap_or_default());
        Self {
            inner,
            cache_dir,
            daily_limit,
            counter,
        }
    }

    pub fn calls_today(&self) -> u32 {
        let g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }
}

#[async_trait]
impl ChatModel for CachingChat {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        let key = cache_key(self.inner.name(), req);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            debug!(target: "llm", key = %key, "llm cache hit");
            return Ok(hit.content);
        }

        {
            let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
            if g.is_expired() {
                g.reset_to_today();
            }
            if g.count >= self.daily_limit {
                bail!("daily llm limit of {} calls reached", self.daily_limit);
            }
        }

        let content = self.inner.complete(req).await?;
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &CachedResponse { content: content.clone() }) {
            warn!(target: "llm", error = %e, "failed to write llm cache entry");
        }
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.count = g.count.saturating_add(1);
        if let Err(e) = save_daily_counter(&self.cache_dir, &g) {
            warn!(target: "llm", error = %e, "failed to persist daily llm counter");
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    content: String,
}

/// Keyed on everything that changes the answer, including today's date so
/// commentary refreshes daily.
fn cache_key(provider: &str, req: &ChatRequest) -> String {
    let mut h = Sha256::new();
    h.update(provider.as_bytes());
    h.update([0]);
    h.update(today().as_bytes());
    h.update([0]);
    h.update(req.system.as_bytes());
    h.update([0]);
    h.update(req.user.as_bytes());
    h.update(req.temperature.to_le_bytes());
    h.update(req.max_tokens.to_le_bytes());
    h.update([req.json_object as u8]);
    let digest = h.finalize();
    digest.iter().take(12).map(|b| format!("{b:02x}")).collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CachedResponse> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&s).ok()
}

fn write_atomic(path: &Path, json: &str) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    fs::rename(tmp, path)
}

fn write_cache_file(dir: &Path, key: &str, value: &CachedResponse) -> io::Result<()> {
    let json = serde_json::to_string(value).map_err(io::Error::other)?;
    write_atomic(&cache_path(dir, key), &json)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let json = serde_json::to_string(dc).map_err(io::Error::other)?;
    write_atomic(&counter_path(dir), &json)
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
