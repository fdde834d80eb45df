use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Ongoing,
    Completed,
    Dropped,
    Hiatus,
    #[default]
    Unknown,
}

impl SeriesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesStatus::Ongoing => "ongoing",
            SeriesStatus::Completed => "completed",
            SeriesStatus::Dropped => "dropped",
            SeriesStatus::Hiatus => "hiatus",
            SeriesStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> SeriesStatus {
        match s {
            "ongoing" => SeriesStatus::Ongoing,
            "completed" => SeriesStatus::Completed,
            "dropped" => SeriesStatus::Dropped,
            "hiatus" => SeriesStatus::Hiatus,
            _ => SeriesStatus::Unknown,
        }
    }

    /// Completed and dropped series are no longer polled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SeriesStatus::Completed | SeriesStatus::Dropped)
    }
}

impl fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (source name, source-local id)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub source: String,
    pub id: String,
}

impl SeriesKey {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chapter {
    pub name: String,
    pub url: String,
    /// Release position within the series, oldest chapter first.
    pub index: u32,
    #[serde(default)]
    pub is_premium: bool,
    /// The site lists the chapter as paid and gives no public link; `url` was
    /// built from a template.
    #[serde(default)]
    pub no_public_url: bool,
}

impl Chapter {
    pub fn new(name: impl Into<String>, url: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            index,
            is_premium: false,
            no_public_url: false,
        }
    }

    pub fn premium(mut self, is_premium: bool) -> Self {
        self.is_premium = is_premium;
        self
    }

    /// Identity used when comparing chapter lists across checks.
    pub fn identity(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Series {
    pub key: SeriesKey,
    pub title: String,
    pub url: String,
    pub synopsis: Option<String>,
    pub cover_url: Option<String>,
    pub status: SeriesStatus,
    pub chapters: Vec<Chapter>,
    pub has_front_page_entry: bool,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_failure: Option<String>,
    /// Set once the series needs an operator to look at it.
    #[serde(default)]
    pub flagged_reason: Option<String>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Series {
    pub fn last_chapter(&self) -> Option<&Chapter> {
        self.chapters.last()
    }

    /// Fold a committed update into the stored state. New chapters are appended
    /// after the last stored index; unlocked chapters lose their premium flag.
    pub fn apply_update(&mut self, update: &ChapterUpdate) {
        for unlocked in &update.unlocked_chapters {
            if let Some(stored) = self
                .chapters
                .iter_mut()
                .find(|c| c.identity() == unlocked.identity())
            {
                stored.is_premium = false;
                stored.no_public_url = false;
                stored.url = unlocked.url.clone();
            }
        }
        self.chapters.extend(update.new_chapters.iter().cloned());

        if let Some(change) = &update.status_change {
            self.status = change.to;
        }
        if let Some(cover) = &update.cover_url {
            self.cover_url = Some(cover.clone());
        }
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.last_checked_at = Some(Utc::now());
    }

    pub fn header(&self) -> SeriesHeader {
        SeriesHeader {
            key: self.key.clone(),
            url: self.url.clone(),
            status: self.status,
            last_chapter: self.chapters.last().cloned(),
            chapter_count: self.chapters.len(),
            has_front_page_entry: self.has_front_page_entry,
            consecutive_failures: self.consecutive_failures,
            flagged: self.flagged_reason.is_some(),
        }
    }
}

/// Lightweight projection returned by search and front-page scrapes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PartialSeries {
    pub key: SeriesKey,
    pub title: String,
    pub url: String,
    pub cover_url: Option<String>,
    /// Most recent chapters shown in the listing, oldest first.
    pub latest_chapters: Vec<Chapter>,
}

impl PartialSeries {
    pub fn into_series(self) -> Series {
        Series {
            key: self.key,
            title: self.title,
            url: self.url,
            synopsis: None,
            cover_url: self.cover_url,
            status: SeriesStatus::Unknown,
            chapters: self.latest_chapters,
            has_front_page_entry: false,
            consecutive_failures: 0,
            last_failure: None,
            flagged_reason: None,
            last_checked_at: None,
        }
    }
}

/// What the engine needs to decide whether and how to poll a series, without
/// loading its chapter list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SeriesHeader {
    pub key: SeriesKey,
    pub url: String,
    pub status: SeriesStatus,
    pub last_chapter: Option<Chapter>,
    pub chapter_count: usize,
    pub has_front_page_entry: bool,
    pub consecutive_failures: u32,
    pub flagged: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    NoChange,
    NewChapters(usize),
    StatusChanged,
    Unavailable,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: SeriesStatus,
    pub to: SeriesStatus,
}

/// Result of one check of one series, handed to the notifier when it carries
/// anything worth telling subscribers about.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChapterUpdate {
    pub key: SeriesKey,
    pub series_title: String,
    pub series_url: String,
    pub kind: UpdateKind,
    /// Every chapter appended to the stored list, premium included.
    pub new_chapters: Vec<Chapter>,
    /// Previously premium chapters that are now public.
    pub unlocked_chapters: Vec<Chapter>,
    /// Chapters subscribers should hear about.
    pub notify_chapters: Vec<Chapter>,
    pub status_change: Option<StatusChange>,
    pub cover_url: Option<String>,
}

impl ChapterUpdate {
    pub fn unchanged(series: &Series) -> Self {
        Self {
            key: series.key.clone(),
            series_title: series.title.clone(),
            series_url: series.url.clone(),
            kind: UpdateKind::NoChange,
            new_chapters: Vec::new(),
            unlocked_chapters: Vec::new(),
            notify_chapters: Vec::new(),
            status_change: None,
            cover_url: None,
        }
    }

    pub fn unavailable(series: &Series) -> Self {
        Self {
            kind: UpdateKind::Unavailable,
            ..Self::unchanged(series)
        }
    }

    /// Whether the stored series must be rewritten.
    pub fn changes_series(&self) -> bool {
        !self.new_chapters.is_empty()
            || !self.unlocked_chapters.is_empty()
            || self.status_change.is_some()
            || self.cover_url.is_some()
    }

    pub fn is_notifiable(&self) -> bool {
        !self.notify_chapters.is_empty() || self.status_change.is_some()
    }
}
