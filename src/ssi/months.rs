// src/ssi/months.rs
//! Calendar-month helpers: the rolling target window and label ⇄ key conversion.
//!
//! Labels are human month names as the model sees them ("May 2024"); keys are
//! the canonical storage form ("2024-05").

use chrono::{Datelike, Local, NaiveDate};
use tracing::warn;

const LABEL_FMT: &str = "%B %Y";

/// Largest look-back window honoured by [`target_months`] (50 years).
pub const MAX_WINDOW_MONTHS: u32 = 600;

/// First day of the month `delta` months away from `d`'s month.
pub fn shift_month(d: NaiveDate, delta: i32) -> Option<NaiveDate> {
    let total = (d.year() * 12 + d.month0() as i32).checked_add(delta)?;
    NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)
}

/// Months from `today + 1 month` back through `window` months before the
/// current one, oldest first. Always `window + 2` entries; `window` is capped
/// at [`MAX_WINDOW_MONTHS`].
pub fn target_months(window: u32, today: NaiveDate) -> Vec<String> {
    if window > MAX_WINDOW_MONTHS {
        warn!(target: "ssi", window, max = MAX_WINDOW_MONTHS, "SSI window too large, capping");
    }
    let window = i32::try_from(window.min(MAX_WINDOW_MONTHS)).unwrap_or(i32::MAX);
    let mut months: Vec<NaiveDate> = (-window..=1)
        .filter_map(|delta| shift_month(today, delta))
        .collect();
    months.sort();
    months.into_iter().map(|m| m.format(LABEL_FMT).to_string()).collect()
}

/// [`target_months`] anchored on the local calendar date.
pub fn target_months_now(window: u32) -> Vec<String> {
    target_months(window, Local::now().date_naive())
}

/// Parse "May 2024" (full or abbreviated month name) to the first of that month.
pub fn parse_month_label(label: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("01 {}", label.trim()), "%d %B %Y").ok()
}

/// "May 2024" → "2024-05". Unparseable labels degrade to a lossy slug
/// ("Spring 2024" → "spring-2024") instead of failing.
pub fn month_label_to_key(label: &str) -> String {
    match parse_month_label(label) {
        Some(d) => d.format("%Y-%m").to_string(),
        None => {
            let slug = label.trim().replace(' ', "-").to_lowercase();
            warn!(target: "ssi", label, slug = %slug, "unparseable month label, using fallback key");
            slug
        }
    }
}

/// "2024-05" → "May 2024"; `None` for anything that is not a `YYYY-MM` key.
pub fn month_key_to_label(key: &str) -> Option<String> {
    if !is_month_key(key) {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d")
        .ok()
        .map(|d| d.format(LABEL_FMT).to_string())
}

pub fn is_month_key(key: &str) -> bool {
    let b = key.as_bytes();
    b.len() == 7
        && b[4] == b'-'
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[5..].iter().all(u8::is_ascii_digit)
}
