// src/subscribers.rs
//! Daily-alert subscriber list kept in a single JSON file.
//!
//! Every operation loads the file, applies the change and writes it back
//! (temp file + rename). Callers that share a store across tasks wrap it in
//! a mutex; the web server does.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FILE_VERSION: &str = "1.0";
pub const DEFAULT_SOURCE: &str = "web_dashboard";
const MAX_EMAIL_LEN: usize = 254;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Failure of a subscriber operation. `Display` is the message shown to users.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Email address is required")]
    Required,
    #[error("Email address cannot be empty")]
    Empty,
    #[error("Email address is too long")]
    TooLong,
    #[error("Invalid email address format")]
    InvalidFormat,
    #[error("Email address is already subscribed")]
    AlreadySubscribed,
    #[error("Email address not found in subscribers")]
    NotFound,
    #[error("Failed to save subscription")]
    Storage(#[source] anyhow::Error),
}

impl SubscriberError {
    /// Validation and membership problems are the caller's fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SubscriberError::Storage(_))
    }
}

pub const SUBSCRIBED_MSG: &str = "Successfully subscribed to daily alerts";
pub const UNSUBSCRIBED_MSG: &str = "Successfully unsubscribed from daily alerts";

/// Normalize (trim + lowercase) and validate an address.
pub fn validate_email(raw: Option<&str>) -> Result<String, SubscriberError> {
    let raw = raw.ok_or(SubscriberError::Required)?;
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(SubscriberError::Empty);
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(SubscriberError::TooLong);
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(SubscriberError::InvalidFormat);
    }
    Ok(email)
}

/// Short stable digest so logs can correlate an address without exposing it.
pub fn email_fingerprint(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

fn now_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: String,
    pub subscribed_at: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_source")]
    pub subscription_source: String,
}

fn default_active() -> bool {
    true
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

fn default_version() -> String {
    FILE_VERSION.to_string()
}

impl SubscriberFile {
    fn fresh() -> Self {
        let now = now_iso();
        Self {
            version: FILE_VERSION.to_string(),
            created_at: Some(now.clone()),
            updated_at: Some(now),
            subscribers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriberStats {
    pub total_subscribers: usize,
    pub active_subscribers: usize,
    pub inactive_subscribers: usize,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub latest_subscription: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriberStore {
    path: PathBuf,
}

impl SubscriberStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, creating an empty one if it does not exist.
    /// A corrupt file reads as an empty list and is left untouched.
    pub fn load(&self) -> SubscriberFile {
        if !self.path.exists() {
            let fresh = SubscriberFile::fresh();
            match self.write(&fresh) {
                Ok(()) => info!(target: "subscribers", path = %self.path.display(), "created subscriber file"),
                Err(e) => warn!(target: "subscribers", error = ?e, "could not create subscriber file"),
            }
            return fresh;
        }
        let parsed = fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<SubscriberFile>(&s).map_err(anyhow::Error::from));
        match parsed {
            Ok(file) => file,
            Err(e) => {
                warn!(target: "subscribers", path = %self.path.display(), error = %e, "subscriber file unreadable, treating as empty");
                SubscriberFile::fresh()
            }
        }
    }

    fn write(&self, file: &SubscriberFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(file).context("encoding subscribers")?;
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn save(&self, mut file: SubscriberFile) -> Result<(), SubscriberError> {
        file.updated_at = Some(now_iso());
        self.write(&file).map_err(SubscriberError::Storage)
    }

    pub fn add(&self, raw: Option<&str>, source: Option<&str>) -> Result<&'static str, SubscriberError> {
        let email = validate_email(raw)?;
        let mut file = self.load();
        if file.subscribers.iter().any(|s| s.email == email) {
            info!(target: "subscribers", who = %email_fingerprint(&email), "duplicate subscription");
            return Err(SubscriberError::AlreadySubscribed);
        }
        file.subscribers.push(Subscriber {
            email: email.clone(),
            subscribed_at: now_iso(),
            active: true,
            subscription_source: source.unwrap_or(DEFAULT_SOURCE).to_string(),
        });
        self.save(file)?;
        info!(target: "subscribers", who = %email_fingerprint(&email), "subscribed");
        Ok(SUBSCRIBED_MSG)
    }

    pub fn remove(&self, raw: Option<&str>) -> Result<&'static str, SubscriberError> {
        let email = validate_email(raw)?;
        let mut file = self.load();
        let before = file.subscribers.len();
        file.subscribers.retain(|s| s.email != email);
        if file.subscribers.len() == before {
            return Err(SubscriberError::NotFound);
        }
        self.save(file)?;
        info!(target: "subscribers", who = %email_fingerprint(&email), "unsubscribed");
        Ok(UNSUBSCRIBED_MSG)
    }

    /// Active addresses in subscription order.
    pub fn active(&self) -> Vec<String> {
        self.load()
            .subscribers
            .into_iter()
            .filter(|s| s.active)
            .map(|s| s.email)
            .collect()
    }

    pub fn stats(&self) -> SubscriberStats {
        let file = self.load();
        let active = file.subscribers.iter().filter(|s| s.active).count();
        let latest = file
            .subscribers
            .iter()
            .filter_map(|s| DateTime::parse_from_rfc3339(&s.subscribed_at).ok().map(|t| (t, s)))
            .max_by_key(|(t, _)| *t)
            .map(|(_, s)| s.subscribed_at.clone());
        SubscriberStats {
            total_subscribers: file.subscribers.len(),
            active_subscribers: active,
            inactive_subscribers: file.subscribers.len() - active,
            created_at: file.created_at,
            updated_at: file.updated_at,
            latest_subscription: latest,
        }
    }

    /// Copy the current file next to itself as
    /// `subscribers_backup_YYYYmmdd_HHMMSS.json`.
    pub fn backup(&self) -> Result<PathBuf> {
        let file = self.load();
        let name = format!("subscribers_backup_{}.json", Local::now().format("%Y%m%d_%H%M%S"));
        let target = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        };
        let json = serde_json::to_string_pretty(&file).context("encoding subscribers backup")?;
        fs::write(&target, json).with_context(|| format!("writing {}", target.display()))?;
        info!(target: "subscribers", path = %target.display(), count = file.subscribers.len(), "backup written");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SubscriberStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriberStore::new(dir.path().join("data").join("subscribers.json"));
        (dir, store)
    }

    #[test]
    fn validation_messages() {
        assert_eq!(validate_email(Some("  Foo@Example.COM ")).unwrap(), "foo@example.com");
        assert_eq!(validate_email(None).unwrap_err().to_string(), "Email address is required");
        assert_eq!(validate_email(Some("   ")).unwrap_err().to_string(), "Email address cannot be empty");
        assert_eq!(validate_email(Some("nope@x")).unwrap_err().to_string(), "Invalid email address format");
        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(validate_email(Some(&long)).unwrap_err().to_string(), "Email address is too long");
    }

    #[test]
    fn missing_file_is_created() {
        let (_dir, store) = store();
        assert!(!store.path().exists());
        let file = store.load();
        assert!(store.path().exists());
        assert_eq!(file.version, "1.0");
        assert!(file.subscribers.is_empty());
    }

    #[test]
    fn add_duplicate_remove() {
        let (_dir, store) = store();
        assert_eq!(store.add(Some("a@b.com"), None).unwrap(), SUBSCRIBED_MSG);
        assert!(matches!(store.add(Some("A@B.com "), None), Err(SubscriberError::AlreadySubscribed)));
        store.add(Some("c@d.org"), Some("cli")).unwrap();
        assert_eq!(store.active(), vec!["a@b.com", "c@d.org"]);

        let file = store.load();
        assert_eq!(file.subscribers[1].subscription_source, "cli");
        assert_eq!(file.subscribers[0].subscription_source, DEFAULT_SOURCE);

        assert_eq!(store.remove(Some("a@b.com")).unwrap(), UNSUBSCRIBED_MSG);
        let err = store.remove(Some("a@b.com")).unwrap_err();
        assert_eq!(err.to_string(), "Email address not found in subscribers");
        assert!(err.is_client_error());
        assert_eq!(store.active(), vec!["c@d.org"]);
    }

    #[test]
    fn corrupt_file_reads_empty() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(store.active().is_empty());
        // left as-is for inspection
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[test]
    fn stats_count_inactive() {
        let (_dir, store) = store();
        let mut file = SubscriberFile::fresh();
        for (email, active, at) in [
            ("x@y.com", true, "2025-06-01T08:00:00+00:00"),
            ("z@y.com", false, "2025-06-03T08:00:00+00:00"),
            ("w@y.com", true, "2025-06-02T08:00:00+00:00"),
        ] {
            file.subscribers.push(Subscriber {
                email: email.into(),
                subscribed_at: at.into(),
                active,
                subscription_source: DEFAULT_SOURCE.into(),
            });
        }
        store.write(&file).unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_subscribers, 3);
        assert_eq!(stats.active_subscribers, 2);
        assert_eq!(stats.inactive_subscribers, 1);
        assert_eq!(stats.latest_subscription.as_deref(), Some("2025-06-03T08:00:00+00:00"));
    }

    #[test]
    fn backup_lands_next_to_file() {
        let (_dir, store) = store();
        store.add(Some("a@b.com"), None).unwrap();
        let path = store.backup().unwrap();
        assert_eq!(path.parent(), store.path().parent());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("subscribers_backup_") && name.ends_with(".json"));
        let copy: SubscriberFile = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(copy.subscribers.len(), 1);
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let fp = email_fingerprint("a@b.com");
        assert_eq!(fp.len(), 12);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, email_fingerprint("a@b.com"));
    }
}
