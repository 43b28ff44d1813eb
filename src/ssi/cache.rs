// src/ssi/cache.rs
//! Persistent month-key → record store backed by a single JSON file.
//!
//! Entries are kept as raw JSON so that incomplete records written by older
//! runs survive a load/save cycle; they simply never count as present.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ssi::months::month_label_to_key;
use crate::ssi::types::MonthlyIndicatorRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default = "now_iso")]
    last_updated: String,
    #[serde(default)]
    monthly_data: BTreeMap<String, Value>,
    #[serde(default = "default_metadata")]
    metadata: Value,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            last_updated: now_iso(),
            monthly_data: BTreeMap::new(),
            metadata: default_metadata(),
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn default_metadata() -> Value {
    serde_json::json!({
        "source": "serpapi+readability+openai",
        "description": "Bank of America Sell Side Indicator monthly data"
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    /// "2024-01 to 2025-03", or "No data".
    pub date_range: String,
    pub last_updated: String,
}

#[derive(Debug, Clone)]
pub struct MonthlyCache {
    path: PathBuf,
    doc: CacheDocument,
}

/// A stored entry counts only if every required field is present and `level` is a number.
pub fn validate_entry(value: &Value) -> Option<MonthlyIndicatorRecord> {
    let rec: MonthlyIndicatorRecord = serde_json::from_value(value.clone()).ok()?;
    rec.level.is_finite().then_some(rec)
}

impl MonthlyCache {
    /// Read the cache file; a missing or unreadable file yields an empty cache.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<CacheDocument>(&s) {
                Ok(doc) => {
                    info!(target: "ssi", entries = doc.monthly_data.len(), path = %path.display(), "loaded SSI cache");
                    doc
                }
                Err(e) => {
                    warn!(target: "ssi", error = %e, path = %path.display(), "SSI cache unreadable, starting fresh");
                    CacheDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(target: "ssi", path = %path.display(), "no SSI cache yet, starting fresh");
                CacheDocument::default()
            }
            Err(e) => {
                warn!(target: "ssi", error = %e, path = %path.display(), "SSI cache unreadable, starting fresh");
                CacheDocument::default()
            }
        };
        Self { path, doc }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_updated(&self) -> &str {
        &self.doc.last_updated
    }

    pub fn get(&self, key: &str) -> Option<MonthlyIndicatorRecord> {
        self.doc.monthly_data.get(key).and_then(validate_entry)
    }

    pub fn contains_valid(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Target labels whose month is absent or holds an invalid entry, in input order.
    pub fn missing_months(&self, targets: &[String]) -> Vec<String> {
        let missing: Vec<String> = targets
            .iter()
            .filter(|m| !self.contains_valid(&month_label_to_key(m)))
            .cloned()
            .collect();
        info!(target: "ssi", count = missing.len(), months = ?missing, "computed missing SSI months");
        missing
    }

    /// Last-write-wins merge keyed by `record.date`. Returns how many entries were written.
    pub fn update(&mut self, records: Vec<MonthlyIndicatorRecord>) -> usize {
        if records.is_empty() {
            info!(target: "ssi", "no new SSI data to cache");
            return 0;
        }
        let stamp = now_iso();
        let mut written = 0usize;
        for mut rec in records {
            if rec.date.trim().is_empty() {
                continue;
            }
            rec.updated_at = Some(stamp.clone());
            match serde_json::to_value(&rec) {
                Ok(v) => {
                    self.doc.monthly_data.insert(rec.date.clone(), v);
                    written += 1;
                }
                Err(e) => warn!(target: "ssi", error = %e, month = %rec.date, "could not encode record"),
            }
        }
        self.doc.last_updated = stamp;
        info!(target: "ssi", written, "updated SSI cache");
        written
    }

    /// Whole-file overwrite via a temp file + rename.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.doc).context("encoding SSI cache")?;
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        info!(target: "ssi", entries = self.doc.monthly_data.len(), path = %self.path.display(), "saved SSI cache");
        Ok(())
    }

    /// Valid records, ascending by month key.
    pub fn all_records(&self) -> Vec<MonthlyIndicatorRecord> {
        self.doc.monthly_data.values().filter_map(validate_entry).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let valid = self.all_records();
        let dates: Vec<&str> = self
            .doc
            .monthly_data
            .values()
            .filter_map(|v| v.get("date").and_then(Value::as_str))
            .collect();
        let date_range = match (dates.iter().min(), dates.iter().max()) {
            (Some(lo), Some(hi)) => format!("{lo} to {hi}"),
            _ => "No data".to_string(),
        };
        CacheStats {
            total_entries: self.doc.monthly_data.len(),
            valid_entries: valid.len(),
            date_range,
            last_updated: self.doc.last_updated.clone(),
        }
    }
}
