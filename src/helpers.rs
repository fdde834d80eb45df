//! Helper functions shared by the adapters.
//!
//! - Status text normalization and the multilingual status vocabulary
//! - Release-date parsing for sites that show a date instead of a status
//! - Chapter-number extraction
//!
//! # Examples
//!
//! ```
//! use rust_manga_tracker::helpers::parse_status;
//! use rust_manga_tracker::models::SeriesStatus;
//!
//! assert_eq!(parse_status("Status: Completed"), SeriesStatus::Completed);
//! assert_eq!(parse_status("En cours"), SeriesStatus::Ongoing);
//! ```

use crate::models::SeriesStatus;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

const COMPLETED: &[&str] = &[
    "completed", "complete", "finish", "finished", "end", "ended",
    // fr
    "terminé", "terminer", "fin",
    // it
    "completo", "completato", "completare", "terminare", "fine",
];

const DROPPED: &[&str] = &[
    "dropped", "drop", "cancel", "cancelled", "canceled",
    // fr
    "annuler", "annulé", "abandonné", "abandonner",
    // it
    "cancellare", "cancellato", "abbandonato", "abbandonare",
];

const HIATUS: &[&str] = &["hiatus", "onhiatus", "paused", "pause", "enpause", "inpausa"];

const ONGOING: &[&str] = &[
    "ongoing", "releasing", "publishing", "updating", "active", "encours", "incorso",
];

fn non_word_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W").ok()).as_ref()
}

/// `"Status: On Hiatus"` becomes `"onhiatus"`.
pub fn normalize_status_text(text: &str) -> String {
    let stripped = match non_word_regex() {
        Some(re) => re.replace_all(text, "").to_string(),
        None => text.split_whitespace().collect(),
    };
    let lowered = stripped.to_lowercase();
    lowered
        .strip_prefix("status")
        .unwrap_or(&lowered)
        .trim()
        .to_string()
}

pub fn parse_status(text: &str) -> SeriesStatus {
    let normalized = normalize_status_text(text);
    if normalized.is_empty() {
        return SeriesStatus::Unknown;
    }
    let word = normalized.as_str();
    if COMPLETED.contains(&word) {
        SeriesStatus::Completed
    } else if DROPPED.contains(&word) {
        SeriesStatus::Dropped
    } else if HIATUS.contains(&word) {
        SeriesStatus::Hiatus
    } else if ONGOING.contains(&word) {
        SeriesStatus::Ongoing
    } else {
        SeriesStatus::Unknown
    }
}

/// A single word with no digits, i.e. a status label rather than a date.
pub fn looks_like_status_label(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && !text.contains(':')
        && !text.contains(' ')
        && !text.chars().any(|c| c.is_ascii_digit())
}

fn relative_time_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?P<n>\d+|an?|one)\s+(?P<unit>[a-z]+?)s?\s+ago$").ok()
    })
    .as_ref()
}

/// Parse "3 days ago" style text or a date in one of `formats`.
pub fn parse_release_time(
    text: &str,
    formats: &[String],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Some(captures) = relative_time_regex().and_then(|re| re.captures(text)) {
        let n = match &captures["n"].to_lowercase()[..] {
            "a" | "an" | "one" => 1,
            digits => digits.parse::<i64>().ok()?,
        };
        let delta = match &captures["unit"].to_lowercase()[..] {
            "second" | "sec" => Duration::seconds(n),
            "minute" | "min" => Duration::minutes(n),
            "hour" | "hr" => Duration::hours(n),
            "day" => Duration::days(n),
            "week" => Duration::weeks(n),
            "month" => Duration::days(30 * n),
            "year" => Duration::days(365 * n),
            _ => return None,
        };
        return Some(now - delta);
    }

    let lowered = text.to_lowercase();
    if lowered == "today" || lowered == "just now" {
        return Some(now);
    }
    if lowered == "yesterday" {
        return Some(now - Duration::days(1));
    }

    formats.iter().find_map(|format| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .and_then(|dt| Utc.from_local_datetime(&dt).single())
    })
}

/// Status for sites that only show the latest release date: a series with no
/// release for `stale_after_days` is treated as on hiatus.
pub fn infer_status_from_release(
    text: &str,
    formats: &[String],
    stale_after_days: i64,
    now: DateTime<Utc>,
) -> SeriesStatus {
    if looks_like_status_label(text) {
        return parse_status(text);
    }
    match parse_release_time(text, formats, now) {
        Some(released) if now - released > Duration::days(stale_after_days) => SeriesStatus::Hiatus,
        Some(_) => SeriesStatus::Ongoing,
        None => SeriesStatus::Unknown,
    }
}

fn chapter_number_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").ok()).as_ref()
}

/// First number in a chapter name, e.g. `"6"` for `"Chapter 6 - The End"`.
pub fn chapter_number(name: &str) -> Option<String> {
    chapter_number_regex()?
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
