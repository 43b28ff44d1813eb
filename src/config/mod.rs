// src/config/mod.rs
//! Application configuration.
//!
//! Non-secret settings come from `config/app.toml` (or `$APP_CONFIG_PATH`);
//! credentials are only ever read from the environment (`.env` is loaded by
//! the binaries via `dotenvy`).

pub mod llm;
pub mod ssi;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use llm::LlmConfig;
pub use ssi::{PacingConfig, SsiSettings};

pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";
pub const ENV_CONFIG_PATH: &str = "APP_CONFIG_PATH";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            data_dir: PathBuf::from("data"),
            logs_dir: PathBuf::from("logs"),
            templates_dir: PathBuf::from("email_templates"),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl PathsConfig {
    pub fn ssi_cache(&self) -> PathBuf {
        self.cache_dir.join("ssi_cache.json")
    }
    pub fn fng_cache(&self) -> PathBuf {
        self.cache_dir.join("fng_cache.json")
    }
    pub fn aaii_cache(&self) -> PathBuf {
        self.cache_dir.join("aaii_cache.json")
    }
    pub fn overall_cache(&self) -> PathBuf {
        self.cache_dir.join("overall_cache.json")
    }
    /// Commentary responses + daily counter.
    pub fn llm_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("llm")
    }
    pub fn subscribers_file(&self) -> PathBuf {
        self.data_dir.join("subscribers.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FearGreedConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FearGreedConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://production.dataviz.cnn.io/index/fearandgreed/graphdata".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AaiiConfig {
    /// Weekly survey history exported from the AAII spreadsheet (manual download).
    pub history_csv: PathBuf,
    /// Append the latest week from YCharts when it is newer than the export.
    pub ycharts_enabled: bool,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for AaiiConfig {
    fn default() -> Self {
        Self {
            history_csv: PathBuf::from("data/sentiment.csv"),
            ycharts_enabled: true,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub from_email: String,
    pub from_name: String,
    /// Filled from SMTP_USER / SMTP_PASS, never from the TOML file.
    #[serde(skip)]
    pub smtp_user: Option<String>,
    #[serde(skip)]
    pub smtp_pass: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            from_email: "alerts@yourdomain.com".into(),
            from_name: "Market Sentiment Terminal".into(),
            smtp_user: None,
            smtp_pass: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub url: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".into(),
        }
    }
}

impl DashboardConfig {
    pub fn unsubscribe_url(&self) -> String {
        format!("{}/unsubscribe", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// "development" | "production"; overridden by APP_ENV.
    pub environment: String,
    pub paths: PathsConfig,
    pub llm: LlmConfig,
    pub ssi: SsiSettings,
    pub fear_greed: FearGreedConfig,
    pub aaii: AaiiConfig,
    pub email: EmailConfig,
    pub dashboard: DashboardConfig,
    #[serde(skip)]
    pub serpapi_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            paths: PathsConfig::default(),
            llm: LlmConfig::default(),
            ssi: SsiSettings::default(),
            fear_greed: FearGreedConfig::default(),
            aaii: AaiiConfig::default(),
            email: EmailConfig::default(),
            dashboard: DashboardConfig::default(),
            serpapi_key: None,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: AppConfig =
            toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $APP_CONFIG_PATH (must exist)
    /// 2) config/app.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load_from_file(PathBuf::from(p));
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from_file(default_path);
        }
        let mut cfg = Self::default();
        cfg.apply_env();
        Ok(cfg)
    }

    /// Overlay environment variables (secrets and a few deploy-time knobs).
    pub fn apply_env(&mut self) {
        self.llm.apply_env();
        self.serpapi_key = env_nonempty("SERPAPI_KEY");

        if let Some(v) = env_nonempty("APP_ENV") {
            self.environment = v.to_ascii_lowercase();
        }
        if let Some(v) = env_nonempty("DASHBOARD_URL") {
            self.dashboard.url = v;
        }
        if let Some(v) = env_nonempty("SMTP_HOST") {
            self.email.smtp_host = Some(v);
        }
        if let Some(v) = env_nonempty("FROM_EMAIL") {
            self.email.from_email = v;
        }
        if let Some(v) = env_nonempty("FROM_NAME") {
            self.email.from_name = v;
        }
        self.email.smtp_user = env_nonempty("SMTP_USER");
        self.email.smtp_pass = env_nonempty("SMTP_PASS");
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// In production every credential must be present; elsewhere this is a no-op.
    pub fn validate_production(&self) -> Result<(), ConfigError> {
        if !self.is_production() {
            return Ok(());
        }
        let mut missing = Vec::new();
        if self.llm.api_key().is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.serpapi_key.is_none() {
            missing.push("SERPAPI_KEY");
        }
        if self.email.smtp_host.is_none() {
            missing.push("SMTP_HOST");
        }
        if self.email.smtp_user.is_none() {
            missing.push("SMTP_USER");
        }
        if self.email.smtp_pass.is_none() {
            missing.push("SMTP_PASS");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingCredentials(missing))
        }
    }

    /// Keys the SSI pipeline cannot run without: (serpapi, openai).
    pub fn pipeline_credentials(&self) -> Result<(String, String), ConfigError> {
        match (self.serpapi_key.as_deref(), self.llm.api_key()) {
            (Some(s), Some(o)) => Ok((s.to_string(), o.to_string())),
            (s, o) => {
                let mut missing = Vec::new();
                if s.is_none() {
                    missing.push("SERPAPI_KEY");
                }
                if o.is_none() {
                    missing.push("OPENAI_API_KEY");
                }
                Err(ConfigError::MissingCredentials(missing))
            }
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn clear_env() {
        for k in [
            "OPENAI_API_KEY",
            "OPENAI_MODEL",
            "SERPAPI_KEY",
            "APP_ENV",
            "DASHBOARD_URL",
            "SMTP_HOST",
            "SMTP_USER",
            "SMTP_PASS",
            "FROM_EMAIL",
            "FROM_NAME",
            ENV_CONFIG_PATH,
        ] {
            env::remove_var(k);
        }
    }

    #[serial_test::serial]
    #[test]
    fn toml_sections_merge_with_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.toml");
        fs::write(
            &p,
            r#"
            [paths]
            cache_dir = "/tmp/x-cache"

            [ssi]
            search_pages = 1

            [dashboard]
            url = "https://sentiment.example.com/"
            "#,
        )
        .unwrap();

        let cfg = AppConfig::load_from_file(&p).unwrap();
        assert_eq!(cfg.paths.ssi_cache(), PathBuf::from("/tmp/x-cache/ssi_cache.json"));
        assert_eq!(cfg.paths.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.ssi.search_pages, 1);
        assert_eq!(cfg.ssi.window_months, 12);
        assert_eq!(
            cfg.dashboard.unsubscribe_url(),
            "https://sentiment.example.com/unsubscribe"
        );
    }

    #[serial_test::serial]
    #[test]
    fn pipeline_credentials_report_every_missing_key() {
        clear_env();
        let mut cfg = AppConfig::default();
        cfg.apply_env();
        assert_eq!(
            cfg.pipeline_credentials(),
            Err(ConfigError::MissingCredentials(vec![
                "SERPAPI_KEY",
                "OPENAI_API_KEY"
            ]))
        );

        env::set_var("SERPAPI_KEY", "serp");
        env::set_var("OPENAI_API_KEY", "sk");
        cfg.apply_env();
        assert_eq!(
            cfg.pipeline_credentials(),
            Ok(("serp".to_string(), "sk".to_string()))
        );
        clear_env();
    }

    #[serial_test::serial]
    #[test]
    fn production_requires_all_credentials() {
        clear_env();
        env::set_var("APP_ENV", "Production");
        env::set_var("OPENAI_API_KEY", "sk");
        let mut cfg = AppConfig::default();
        cfg.apply_env();
        assert!(cfg.is_production());
        let err = cfg.validate_production().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required environment variables: SERPAPI_KEY, SMTP_HOST, SMTP_USER, SMTP_PASS"
        );
        clear_env();
    }
}
