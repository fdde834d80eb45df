//! Catalog storage seen by the engine.
//!
//! The engine is the only writer. Each `upsert_series` replaces a series and
//! its chapter list as one unit; readers never observe a partial list.

use crate::error::ScanError;
use crate::models::{Series, SeriesHeader, SeriesKey};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn get_series(&self, key: &SeriesKey) -> Result<Option<Series>, ScanError>;

    async fn upsert_series(&self, series: &Series) -> Result<(), ScanError>;

    /// Headers of every series still worth polling (not completed, dropped
    /// or flagged), optionally restricted to one source, ordered by key.
    async fn get_series_due_for_check(&self, source: Option<&str>) -> Result<Vec<SeriesHeader>, ScanError>;

    /// Record a failed check. Returns the consecutive failure count.
    async fn mark_failed(&self, key: &SeriesKey, reason: &str) -> Result<u32, ScanError>;

    async fn clear_failures(&self, key: &SeriesKey) -> Result<(), ScanError>;

    /// Take the series out of rotation until an operator clears the flag.
    async fn flag_series(&self, key: &SeriesKey, reason: &str) -> Result<(), ScanError>;

    async fn clear_flag(&self, key: &SeriesKey) -> Result<(), ScanError>;

    /// Returns false when the series did not exist.
    async fn remove_series(&self, key: &SeriesKey) -> Result<bool, ScanError>;
}

pub(crate) fn missing(key: &SeriesKey) -> ScanError {
    ScanError::Storage(format!("series {} is not stored", key))
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    series: RwLock<BTreeMap<SeriesKey, Series>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.series.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_series<T>(&self, key: &SeriesKey, f: impl FnOnce(&mut Series) -> T) -> Result<T, ScanError> {
        let mut all = self.series.write().unwrap_or_else(|p| p.into_inner());
        all.get_mut(key).map(f).ok_or_else(|| missing(key))
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn get_series(&self, key: &SeriesKey) -> Result<Option<Series>, ScanError> {
        Ok(self
            .series
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    async fn upsert_series(&self, series: &Series) -> Result<(), ScanError> {
        self.series
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(series.key.clone(), series.clone());
        Ok(())
    }

    async fn get_series_due_for_check(&self, source: Option<&str>) -> Result<Vec<SeriesHeader>, ScanError> {
        let all = self.series.read().unwrap_or_else(|p| p.into_inner());
        Ok(all
            .values()
            .filter(|s| source.map_or(true, |name| s.key.source == name))
            .filter(|s| !s.status.is_terminal() && s.flagged_reason.is_none())
            .map(Series::header)
            .collect())
    }

    async fn mark_failed(&self, key: &SeriesKey, reason: &str) -> Result<u32, ScanError> {
        self.with_series(key, |s| {
            s.consecutive_failures += 1;
            s.last_failure = Some(reason.to_string());
            s.consecutive_failures
        })
    }

    async fn clear_failures(&self, key: &SeriesKey) -> Result<(), ScanError> {
        self.with_series(key, |s| {
            s.consecutive_failures = 0;
            s.last_failure = None;
        })
    }

    async fn flag_series(&self, key: &SeriesKey, reason: &str) -> Result<(), ScanError> {
        self.with_series(key, |s| s.flagged_reason = Some(reason.to_string()))
    }

    async fn clear_flag(&self, key: &SeriesKey) -> Result<(), ScanError> {
        self.with_series(key, |s| {
            s.flagged_reason = None;
            s.consecutive_failures = 0;
        })
    }

    async fn remove_series(&self, key: &SeriesKey) -> Result<bool, ScanError> {
        Ok(self
            .series
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, PartialSeries, SeriesStatus};

    fn series(source: &str, id: &str, status: SeriesStatus) -> Series {
        let mut series = PartialSeries {
            key: SeriesKey::new(source, id),
            title: id.to_string(),
            url: format!("https://{}.example/series/{}", source, id),
            cover_url: None,
            latest_chapters: vec![Chapter::new("Chapter 1", format!("https://{}.example/{}/1", source, id), 0)],
        }
        .into_series();
        series.status = status;
        series
    }

    #[tokio::test]
    async fn test_due_for_check_skips_terminal_and_flagged() {
        let store = MemoryStore::new();
        store.upsert_series(&series("asura", "a", SeriesStatus::Ongoing)).await.unwrap();
        store.upsert_series(&series("asura", "b", SeriesStatus::Completed)).await.unwrap();
        store.upsert_series(&series("asura", "c", SeriesStatus::Hiatus)).await.unwrap();
        store.upsert_series(&series("flame", "d", SeriesStatus::Unknown)).await.unwrap();
        store.flag_series(&SeriesKey::new("asura", "c"), "reset").await.unwrap();

        let due = store.get_series_due_for_check(None).await.unwrap();
        let ids: Vec<_> = due.iter().map(|h| h.key.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);

        let due = store.get_series_due_for_check(Some("flame")).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].last_chapter.as_ref().unwrap().name, "Chapter 1");
    }

    #[tokio::test]
    async fn test_failure_counter() {
        let store = MemoryStore::new();
        let key = SeriesKey::new("asura", "a");
        store.upsert_series(&series("asura", "a", SeriesStatus::Ongoing)).await.unwrap();
        assert_eq!(store.mark_failed(&key, "timeout").await.unwrap(), 1);
        assert_eq!(store.mark_failed(&key, "timeout").await.unwrap(), 2);
        store.clear_failures(&key).await.unwrap();
        let stored = store.get_series(&key).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, 0);
        assert!(stored.last_failure.is_none());

        let unknown = SeriesKey::new("asura", "zzz");
        assert!(store.mark_failed(&unknown, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_series() {
        let store = MemoryStore::new();
        let key = SeriesKey::new("asura", "a");
        store.upsert_series(&series("asura", "a", SeriesStatus::Ongoing)).await.unwrap();
        assert!(store.remove_series(&key).await.unwrap());
        assert!(!store.remove_series(&key).await.unwrap());
        assert!(store.is_empty());
    }
}
