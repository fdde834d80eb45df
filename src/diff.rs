//! Chapter-list diffing.
//!
//! Lists are compared by chapter identity (the URL), never by length. The
//! newest stored chapter that still appears in the fetched list anchors the
//! comparison; only chapters after the anchor can be new.

use crate::error::ScanError;
use crate::models::{Chapter, ChapterUpdate, Series, SeriesStatus, StatusChange, UpdateKind};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Put premium chapters in the notify set as well.
    pub include_premium: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterDiff {
    /// Re-indexed to continue after the last stored chapter.
    pub new: Vec<Chapter>,
    pub unlocked: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Fetched list is empty while chapters were stored before.
    Unavailable,
    /// No stored chapter appears in the fetched list.
    Reset { stored: usize, fetched: usize },
}

/// Position of the newest stored chapter inside `fetched`, if any.
fn anchor(stored: &[Chapter], fetched: &[Chapter]) -> Option<usize> {
    stored.iter().rev().find_map(|s| {
        fetched
            .iter()
            .rposition(|f| f.identity() == s.identity())
    })
}

/// Whether `fetched` (usually a short front-page listing) overlaps the
/// stored list at all.
pub fn has_anchor(stored: &[Chapter], fetched: &[Chapter]) -> bool {
    anchor(stored, fetched).is_some()
}

pub fn diff_chapters(stored: &[Chapter], fetched: &[Chapter]) -> Result<ChapterDiff, DiffOutcome> {
    if fetched.is_empty() {
        return if stored.is_empty() {
            Ok(ChapterDiff::default())
        } else {
            Err(DiffOutcome::Unavailable)
        };
    }

    let next_index = stored.last().map(|c| c.index + 1).unwrap_or(0);

    if stored.is_empty() {
        let new = fetched
            .iter()
            .enumerate()
            .map(|(i, c)| Chapter {
                index: i as u32,
                ..c.clone()
            })
            .collect();
        return Ok(ChapterDiff {
            new,
            unlocked: Vec::new(),
        });
    }

    let position = anchor(stored, fetched).ok_or(DiffOutcome::Reset {
        stored: stored.len(),
        fetched: fetched.len(),
    })?;

    let known: HashSet<&str> = stored.iter().map(Chapter::identity).collect();
    let new = fetched[position + 1..]
        .iter()
        .filter(|c| !known.contains(c.identity()))
        .enumerate()
        .map(|(i, c)| Chapter {
            index: next_index + i as u32,
            ..c.clone()
        })
        .collect();

    let unlocked = stored
        .iter()
        .filter(|s| s.is_premium)
        .filter_map(|s| {
            fetched
                .iter()
                .find(|f| f.identity() == s.identity() && !f.is_premium)
                .map(|f| Chapter {
                    index: s.index,
                    ..f.clone()
                })
        })
        .collect();

    Ok(ChapterDiff { new, unlocked })
}

/// Turn a freshly scraped state into the update for `series`.
pub fn build_update(
    series: &Series,
    fetched: &[Chapter],
    status: SeriesStatus,
    cover_url: Option<String>,
    options: DiffOptions,
) -> Result<ChapterUpdate, ScanError> {
    let diff = match diff_chapters(&series.chapters, fetched) {
        Ok(diff) => diff,
        Err(DiffOutcome::Unavailable) => return Ok(ChapterUpdate::unavailable(series)),
        Err(DiffOutcome::Reset { stored, fetched }) => {
            return Err(ScanError::Anomaly {
                source_name: series.key.source.clone(),
                series_id: series.key.id.clone(),
                stored,
                fetched,
            })
        }
    };

    let status_change = (status != SeriesStatus::Unknown && status != series.status).then_some(
        StatusChange {
            from: series.status,
            to: status,
        },
    );
    let cover_url = cover_url.filter(|c| series.cover_url.as_deref() != Some(c.as_str()));

    let mut notify_chapters = diff.unlocked.clone();
    notify_chapters.extend(
        diff.new
            .iter()
            .filter(|c| options.include_premium || !c.is_premium)
            .cloned(),
    );

    let changed = diff.new.len() + diff.unlocked.len();
    let kind = if changed > 0 {
        UpdateKind::NewChapters(changed)
    } else if status_change.is_some() {
        UpdateKind::StatusChanged
    } else {
        UpdateKind::NoChange
    };

    Ok(ChapterUpdate {
        key: series.key.clone(),
        series_title: series.title.clone(),
        series_url: series.url.clone(),
        kind,
        new_chapters: diff.new,
        unlocked_chapters: diff.unlocked,
        notify_chapters,
        status_change,
        cover_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartialSeries, SeriesKey};

    fn chapters(numbers: &[u32]) -> Vec<Chapter> {
        numbers
            .iter()
            .enumerate()
            .map(|(i, n)| {
                Chapter::new(
                    format!("Chapter {}", n),
                    format!("https://toonsite.example/series/a/chapter-{}", n),
                    i as u32,
                )
            })
            .collect()
    }

    fn series(stored: Vec<Chapter>) -> Series {
        let mut series = PartialSeries {
            key: SeriesKey::new("toonsite", "a"),
            title: "A".to_string(),
            url: "https://toonsite.example/series/a".to_string(),
            cover_url: None,
            latest_chapters: stored,
        }
        .into_series();
        series.status = SeriesStatus::Ongoing;
        series
    }

    fn names(chapters: &[Chapter]) -> Vec<&str> {
        chapters.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_prefix_yields_exact_suffix() {
        for stored_len in 0..6u32 {
            let all: Vec<u32> = (1..=6).collect();
            let stored = chapters(&all[..stored_len as usize]);
            let fetched = chapters(&all);
            let diff = diff_chapters(&stored, &fetched).unwrap();
            assert_eq!(diff.new.len(), 6 - stored_len as usize);
            for c in &diff.new {
                assert!(!stored.iter().any(|s| s.identity() == c.identity()));
            }
        }
    }

    #[test]
    fn test_new_chapters_continue_stored_indexes() {
        let diff = diff_chapters(&chapters(&[1, 2, 3]), &chapters(&[1, 2, 3, 4, 5])).unwrap();
        assert_eq!(names(&diff.new), vec!["Chapter 4", "Chapter 5"]);
        assert_eq!(diff.new[0].index, 3);
        assert_eq!(diff.new[1].index, 4);
    }

    #[test]
    fn test_tail_window_matches_by_identity_not_count() {
        // front page style listing: only the latest three, re-indexed from 0
        let stored = chapters(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let window: Vec<Chapter> = chapters(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])[7..].to_vec();
        let diff = diff_chapters(&stored, &window).unwrap();
        assert_eq!(names(&diff.new), vec!["Chapter 9", "Chapter 10"]);
        assert_eq!(diff.new[0].index, 8);
    }

    #[test]
    fn test_removed_latest_chapter_falls_back_to_earlier_anchor() {
        // chapter 3 was taken down and chapter 4 released
        let stored = chapters(&[1, 2, 3]);
        let mut fetched = chapters(&[1, 2]);
        fetched.push(Chapter::new("Chapter 4", "https://toonsite.example/series/a/chapter-4", 2));
        let diff = diff_chapters(&stored, &fetched).unwrap();
        assert_eq!(names(&diff.new), vec!["Chapter 4"]);
    }

    #[test]
    fn test_reset_is_an_anomaly() {
        let stored = chapters(&[1, 2, 3]);
        let fetched: Vec<Chapter> = chapters(&[1, 2, 3])
            .into_iter()
            .map(|mut c| {
                c.url = c.url.replace("series/a", "series/a-reboot");
                c
            })
            .collect();
        assert_eq!(
            diff_chapters(&stored, &fetched),
            Err(DiffOutcome::Reset { stored: 3, fetched: 3 })
        );

        let err = build_update(&series(stored), &fetched, SeriesStatus::Ongoing, None, DiffOptions::default())
            .unwrap_err();
        assert!(matches!(err, ScanError::Anomaly { stored: 3, fetched: 3, .. }));
    }

    #[test]
    fn test_first_check_is_one_event() {
        let update = build_update(
            &series(Vec::new()),
            &chapters(&[1, 2, 3, 4]),
            SeriesStatus::Ongoing,
            None,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(update.kind, UpdateKind::NewChapters(4));
        assert_eq!(update.new_chapters.len(), 4);
    }

    #[test]
    fn test_empty_fetch_after_success_is_unavailable() {
        let update = build_update(
            &series(chapters(&[1, 2])),
            &[],
            SeriesStatus::Ongoing,
            None,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(update.kind, UpdateKind::Unavailable);
        assert!(!update.changes_series());
    }

    #[test]
    fn test_premium_excluded_from_notify_unless_requested() {
        let stored = chapters(&[1, 2]);
        let mut fetched = chapters(&[1, 2, 3]);
        fetched[2].is_premium = true;

        let update = build_update(&series(stored.clone()), &fetched, SeriesStatus::Ongoing, None, DiffOptions::default())
            .unwrap();
        assert_eq!(update.kind, UpdateKind::NewChapters(1));
        assert_eq!(update.new_chapters.len(), 1);
        assert!(update.notify_chapters.is_empty());

        let inclusive = DiffOptions { include_premium: true };
        let update = build_update(&series(stored), &fetched, SeriesStatus::Ongoing, None, inclusive).unwrap();
        assert_eq!(update.notify_chapters.len(), 1);
    }

    #[test]
    fn test_unlocked_chapter_is_notified() {
        let mut stored = chapters(&[1, 2, 3]);
        stored[2].is_premium = true;
        let fetched = chapters(&[1, 2, 3]);

        let update = build_update(&series(stored), &fetched, SeriesStatus::Ongoing, None, DiffOptions::default())
            .unwrap();
        assert!(update.new_chapters.is_empty());
        assert_eq!(names(&update.unlocked_chapters), vec!["Chapter 3"]);
        assert_eq!(names(&update.notify_chapters), vec!["Chapter 3"]);
        assert_eq!(update.kind, UpdateKind::NewChapters(1));
    }

    #[test]
    fn test_status_change_without_chapters() {
        let update = build_update(
            &series(chapters(&[1, 2])),
            &chapters(&[1, 2]),
            SeriesStatus::Completed,
            None,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(update.kind, UpdateKind::StatusChanged);
        assert_eq!(update.status_change.unwrap().to, SeriesStatus::Completed);

        let unchanged = build_update(
            &series(chapters(&[1, 2])),
            &chapters(&[1, 2]),
            SeriesStatus::Unknown,
            None,
            DiffOptions::default(),
        )
        .unwrap();
        assert_eq!(unchanged.kind, UpdateKind::NoChange);
        assert!(!unchanged.changes_series());
    }
}
