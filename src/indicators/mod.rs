// src/indicators/mod.rs
//! Daily sentiment snapshots (CNN Fear & Greed, AAII survey) and the JSON
//! files they are cached in.

pub mod aaii;
pub mod fear_greed;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub use aaii::{AaiiRow, AaiiSnapshot};
pub use fear_greed::FearGreedSnapshot;

/// A snapshot cache that is missing or unreadable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} data not available. Please run the update script.")]
pub struct Unavailable(pub &'static str);

/// Read a cached snapshot. Missing and corrupt files both map to [`Unavailable`].
pub fn read_snapshot<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T, Unavailable> {
    let data = fs::read_to_string(path).map_err(|e| {
        debug!(target: "indicators", what, path = %path.display(), error = %e, "snapshot missing");
        Unavailable(what)
    })?;
    serde_json::from_str(&data).map_err(|e| {
        debug!(target: "indicators", what, path = %path.display(), error = %e, "snapshot corrupt");
        Unavailable(what)
    })
}

/// Pretty-printed whole-file write via temp file + rename.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value).context("encoding snapshot")?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(json.as_bytes())?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    info!(target: "indicators", path = %path.display(), "snapshot written");
    Ok(())
}

/// Round to one decimal place.
pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snap {
        score: f64,
    }

    #[test]
    fn snapshot_round_trip_and_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("cache").join("x.json");
        assert_eq!(read_snapshot::<Snap>(&p, "Test"), Err(Unavailable("Test")));

        write_snapshot(&p, &Snap { score: 41.5 }).unwrap();
        assert_eq!(read_snapshot::<Snap>(&p, "Test").unwrap(), Snap { score: 41.5 });

        fs::write(&p, "{").unwrap();
        let err = read_snapshot::<Snap>(&p, "Test").unwrap_err();
        assert_eq!(err.to_string(), "Test data not available. Please run the update script.");
    }

    #[test]
    fn rounding() {
        assert_eq!(round1(41.25), 41.3);
        assert_eq!(round1(-7.04), -7.0);
    }
}
