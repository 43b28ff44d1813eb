// src/llm/commentary.rs
//! Short-form market commentary for the dashboard and the daily email.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ChatRequest, DynChat};
use crate::config::LlmConfig;

pub const NOT_CONFIGURED: &str = "LLM key not configured.";
pub const UNAVAILABLE: &str = "Commentary unavailable.";

const SYSTEM_PROMPT: &str = "You are a seasoned macro and equity strategist writing short-form market commentary. \
Tone: objective, concise, actionable, no hype. \
Audience: professional investors with contrarian tilt. \
Limit output to about 40 words. Plain text, no markdown, no emojis.";

pub const RECOMMENDATIONS: &[&str] = &["STRONG SELL", "SELL", "HOLD", "BUY", "STRONG BUY"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallAnalysis {
    pub recommendation: String,
    pub commentary: String,
}

impl Default for OverallAnalysis {
    fn default() -> Self {
        Self {
            recommendation: "HOLD".into(),
            commentary: UNAVAILABLE.into(),
        }
    }
}

/// Latest SSI reading fed into the combined analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct SsiReading {
    pub level: f64,
    pub date: String,
}

pub struct Commentator {
    chat: DynChat,
    temperature: f32,
    max_tokens: u32,
}

impl Commentator {
    pub fn new(chat: DynChat, cfg: &LlmConfig) -> Self {
        Self {
            chat,
            temperature: cfg.commentary_temperature,
            max_tokens: cfg.commentary_max_tokens,
        }
    }

    async fn ask(&self, user: String) -> String {
        if !self.chat.is_enabled() {
            return NOT_CONFIGURED.to_string();
        }
        let req = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_object: false,
        };
        match self.chat.complete(&req).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(target: "llm", error = ?e, "commentary call failed");
                UNAVAILABLE.to_string()
            }
        }
    }

    pub async fn fear_greed(&self, score: f64, rating: &str) -> String {
        self.ask(fear_greed_prompt(score, rating)).await
    }

    pub async fn aaii(&self, bullish: f64, bearish: f64) -> String {
        self.ask(aaii_prompt(bullish, bearish)).await
    }

    pub async fn overall(
        &self,
        fng: Option<(f64, &str)>,
        aaii: Option<(f64, f64)>,
        ssi: Option<&SsiReading>,
    ) -> OverallAnalysis {
        let raw = self.ask(overall_prompt(fng, aaii, ssi)).await;
        parse_overall(&raw)
    }
}

fn fmt_num(v: f64) -> String {
    let r = (v * 10.0).round() / 10.0;
    if r.fract() == 0.0 {
        format!("{r:.0}")
    } else {
        format!("{r:.1}")
    }
}

pub fn fear_greed_prompt(score: f64, rating: &str) -> String {
    format!(
        "CNN Fear & Greed index reading: {} ({}). \
Compose a 2-3-sentence interpretation of what this level historically implies for next-month S&P 500 risk-reward. \
Highlight contrarian angle if sentiment is extreme.",
        fmt_num(score),
        rating.to_uppercase()
    )
}

pub fn aaii_prompt(bullish: f64, bearish: f64) -> String {
    format!(
        "AAII weekly survey: Bull {}%, Bear {}% (Spread {} pp). \
Write a 2-3-sentence contrarian interpretation of this sentiment mix and what it historically precedes for equities in the next 8-12 weeks.",
        fmt_num(bullish),
        fmt_num(bearish),
        fmt_num(bullish - bearish)
    )
}

pub fn overall_prompt(fng: Option<(f64, &str)>, aaii: Option<(f64, f64)>, ssi: Option<&SsiReading>) -> String {
    let mut p = String::from("Act as a veteran contrarian investor reviewing sentiment data. ");
    match fng {
        Some((score, rating)) => p.push_str(&format!("CNN Fear & Greed: {} ({rating}). ", fmt_num(score))),
        None => p.push_str("CNN Fear & Greed: unavailable. "),
    }
    match aaii {
        Some((bull, bear)) => p.push_str(&format!(
            "AAII Bull {}%, Bear {}% (Spread {} pp). ",
            fmt_num(bull),
            fmt_num(bear),
            fmt_num(bull - bear)
        )),
        None => p.push_str("AAII: unavailable. "),
    }
    if let Some(s) = ssi {
        p.push_str(&format!("BofA SSI: {}% ({}). ", fmt_num(s.level), s.date));
    }
    p.push_str(
        "Issue a ONE-WORD recommendation from: STRONG SELL, SELL, HOLD, BUY, STRONG BUY, followed by a 35-40-word rationale. \
Format exactly as: RECOMMENDATION: <word>\nCOMMENTARY: <text>.",
    );
    p
}

/// Pull `RECOMMENDATION:` / `COMMENTARY:` lines out of a model answer. A
/// missing recommendation is HOLD; a missing commentary line keeps the raw text.
pub fn parse_overall(raw: &str) -> OverallAnalysis {
    let mut recommendation = "HOLD".to_string();
    let mut commentary = raw.trim().to_string();
    for line in raw.lines() {
        let line = line.trim();
        let upper = line.to_ascii_uppercase();
        let value = || line.split_once(':').map(|(_, v)| v.trim().to_string());
        if upper.starts_with("RECOMMENDATION") {
            if let Some(v) = value() {
                let v = v.trim_end_matches('.').to_ascii_uppercase();
                if RECOMMENDATIONS.contains(&v.as_str()) {
                    recommendation = v;
                }
            }
        } else if upper.starts_with("COMMENTARY") {
            if let Some(v) = value() {
                commentary = v;
            }
        }
    }
    OverallAnalysis {
        recommendation,
        commentary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatModel, DisabledChat};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct Canned {
        answer: Result<String, String>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatModel for Canned {
        async fn complete(&self, req: &ChatRequest) -> Result<String> {
            self.seen.lock().unwrap().push(req.clone());
            self.answer.clone().map_err(|e| anyhow::anyhow!(e))
        }
        fn name(&self) -> &'static str {
            "canned"
        }
    }

    fn canned(answer: Result<&str, &str>) -> Arc<Canned> {
        Arc::new(Canned {
            answer: answer.map(str::to_string).map_err(str::to_string),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn overall_parsing() {
        let a = parse_overall("RECOMMENDATION: buy\nCOMMENTARY: Fear is elevated while positioning is light.");
        assert_eq!(a.recommendation, "BUY");
        assert_eq!(a.commentary, "Fear is elevated while positioning is light.");

        let b = parse_overall("Markets look balanced.");
        assert_eq!(b.recommendation, "HOLD");
        assert_eq!(b.commentary, "Markets look balanced.");

        let c = parse_overall("Recommendation: Strong Sell.\nCommentary: Euphoria everywhere.");
        assert_eq!(c.recommendation, "STRONG SELL");

        let d = parse_overall("RECOMMENDATION: YOLO\nCOMMENTARY: x");
        assert_eq!(d.recommendation, "HOLD");
    }

    #[test]
    fn prompts_embed_readings() {
        assert!(fear_greed_prompt(23.4, "extreme fear").contains("23.4 (EXTREME FEAR)"));
        assert!(aaii_prompt(41.2, 30.0).contains("Bull 41.2%, Bear 30% (Spread 11.2 pp)"));
        let ssi = SsiReading { level: 55.7, date: "2025-03".into() };
        let p = overall_prompt(Some((60.0, "greed")), Some((41.2, 30.0)), Some(&ssi));
        assert!(p.contains("BofA SSI: 55.7% (2025-03)"));
        assert!(p.contains("RECOMMENDATION: <word>"));
    }

    #[tokio::test]
    async fn commentary_uses_configured_sampling_and_falls_back() {
        let cfg = LlmConfig::default();
        let ok = canned(Ok("  Sentiment is stretched.  "));
        let c = Commentator::new(ok.clone(), &cfg);
        assert_eq!(c.fear_greed(80.0, "extreme greed").await, "Sentiment is stretched.");
        let seen = ok.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, 120);
        assert!((seen[0].temperature - 0.7).abs() < f32::EPSILON);
        assert!(!seen[0].json_object);
        drop(seen);

        let failing = Commentator::new(canned(Err("timeout")), &cfg);
        assert_eq!(failing.aaii(30.0, 40.0).await, UNAVAILABLE);
        assert_eq!(failing.overall(None, None, None).await, OverallAnalysis {
            recommendation: "HOLD".into(),
            commentary: UNAVAILABLE.into(),
        });

        let disabled = Commentator::new(Arc::new(DisabledChat), &cfg);
        assert_eq!(disabled.fear_greed(50.0, "neutral").await, NOT_CONFIGURED);
    }
}
