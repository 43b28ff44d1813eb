// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_daily_limit() -> u32 {
    50
}
fn default_commentary_temperature() -> f32 {
    0.7
}
fn default_commentary_max_tokens() -> u32 {
    120
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Only "openai" is wired; anything else disables the LLM.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Max real commentary calls per day; cache hits are free.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_commentary_temperature")]
    pub commentary_temperature: f32,
    #[serde(default = "default_commentary_max_tokens")]
    pub commentary_max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// OPENAI_API_KEY as of the last `apply_env`, when `api_key` is "ENV".
    #[serde(skip)]
    pub(crate) env_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: default_endpoint(),
            api_key: default_api_key(),
            daily_limit: default_daily_limit(),
            commentary_temperature: default_commentary_temperature(),
            commentary_max_tokens: default_commentary_max_tokens(),
            timeout_secs: default_timeout_secs(),
            env_key: None,
        }
    }
}

impl LlmConfig {
    /// Resolve env-backed fields and clamp out-of-range values.
    pub fn apply_env(&mut self) {
        self.provider = self.provider.trim().to_lowercase();

        self.env_key = env::var("OPENAI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if let Ok(model) = env::var("OPENAI_MODEL") {
            if !model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
        }

        if !(0.0..=2.0).contains(&self.commentary_temperature) {
            self.commentary_temperature = default_commentary_temperature();
        }
        if self.commentary_max_tokens == 0 {
            self.commentary_max_tokens = default_commentary_max_tokens();
        }
    }

    /// The resolved key, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        let k = self.api_key.trim();
        if k.eq_ignore_ascii_case("env") {
            self.env_key.as_deref()
        } else if k.is_empty() {
            None
        } else {
            Some(k)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider == "openai" && self.api_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_and_band_is_sanitized() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        env::remove_var("OPENAI_MODEL");
        let mut cfg = LlmConfig {
            provider: " OpenAI ".into(),
            commentary_temperature: 7.5,
            ..LlmConfig::default()
        };
        cfg.apply_env();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key(), Some("sk-test"));
        assert!((cfg.commentary_temperature - 0.7).abs() < f32::EPSILON);
        assert!(cfg.is_enabled());
        env::remove_var("OPENAI_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_key_disables_llm() {
        env::remove_var("OPENAI_API_KEY");
        let mut cfg = LlmConfig::default();
        cfg.apply_env();
        assert_eq!(cfg.api_key(), None);
        assert!(!cfg.is_enabled());
    }

    #[serial_test::serial]
    #[test]
    fn env_sentinel_survives_a_reload_without_key() {
        env::remove_var("OPENAI_API_KEY");
        let mut cfg = LlmConfig::default();
        cfg.apply_env();
        assert_eq!(cfg.api_key, "ENV");
        assert_eq!(cfg.api_key(), None);

        env::set_var("OPENAI_API_KEY", " sk-later ");
        cfg.apply_env();
        assert_eq!(cfg.api_key(), Some("sk-later"));

        env::remove_var("OPENAI_API_KEY");
        cfg.apply_env();
        assert_eq!(cfg.api_key(), None);
    }

    #[test]
    fn literal_key_needs_no_env() {
        let cfg = LlmConfig {
            api_key: "sk-inline".into(),
            ..LlmConfig::default()
        };
        assert_eq!(cfg.api_key(), Some("sk-inline"));
    }
}
