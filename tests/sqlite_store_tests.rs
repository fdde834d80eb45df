use rust_manga_tracker::db::SqliteStore;
use rust_manga_tracker::models::{Chapter, PartialSeries, Series, SeriesKey, SeriesStatus};
use rust_manga_tracker::store::SeriesStore;

fn series(id: &str, status: SeriesStatus, chapters: Vec<Chapter>) -> Series {
    let mut series = PartialSeries {
        key: SeriesKey::new("toonsite", id),
        title: format!("Series {}", id),
        url: format!("https://toonsite.example/series/{}", id),
        cover_url: Some(format!("https://toonsite.example/covers/{}.webp", id)),
        latest_chapters: chapters,
    }
    .into_series();
    series.status = status;
    series.synopsis = Some("A hunter levels up.".to_string());
    series
}

fn chapters(count: u32) -> Vec<Chapter> {
    (1..=count)
        .map(|n| Chapter::new(format!("Chapter {}", n), format!("https://toonsite.example/c/{}", n), n - 1))
        .collect()
}

#[tokio::test]
async fn test_series_round_trip_keeps_chapter_order_and_flags() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut list = chapters(3);
    list[2].is_premium = true;
    list[2].no_public_url = true;
    let original = series("solo", SeriesStatus::Ongoing, list);

    store.upsert_series(&original).await.unwrap();
    let loaded = store.get_series(&original.key).await.unwrap().unwrap();

    assert_eq!(loaded.title, original.title);
    assert_eq!(loaded.synopsis, original.synopsis);
    assert_eq!(loaded.cover_url, original.cover_url);
    assert_eq!(loaded.status, SeriesStatus::Ongoing);
    assert_eq!(loaded.chapters, original.chapters);
    assert!(loaded.chapters[2].no_public_url);
}

#[tokio::test]
async fn test_upsert_replaces_the_chapter_list() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut stored = series("solo", SeriesStatus::Ongoing, chapters(2));
    store.upsert_series(&stored).await.unwrap();

    stored.chapters = chapters(4);
    stored.status = SeriesStatus::Hiatus;
    store.upsert_series(&stored).await.unwrap();

    let loaded = store.get_series(&stored.key).await.unwrap().unwrap();
    assert_eq!(loaded.chapters.len(), 4);
    assert_eq!(loaded.status, SeriesStatus::Hiatus);
}

#[tokio::test]
async fn test_due_headers_carry_the_last_chapter() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert_series(&series("a", SeriesStatus::Ongoing, chapters(3))).await.unwrap();
    store.upsert_series(&series("b", SeriesStatus::Completed, chapters(1))).await.unwrap();
    store.upsert_series(&series("c", SeriesStatus::Unknown, Vec::new())).await.unwrap();
    store.upsert_series(&series("d", SeriesStatus::Ongoing, chapters(1))).await.unwrap();
    store.flag_series(&SeriesKey::new("toonsite", "d"), "reset").await.unwrap();

    let due = store.get_series_due_for_check(Some("toonsite")).await.unwrap();
    let ids: Vec<_> = due.iter().map(|h| h.key.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);

    assert_eq!(due[0].chapter_count, 3);
    assert_eq!(due[0].last_chapter.as_ref().unwrap().name, "Chapter 3");
    assert!(due[1].last_chapter.is_none());

    assert!(store.get_series_due_for_check(Some("elsewhere")).await.unwrap().is_empty());
    assert_eq!(store.get_series_due_for_check(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failure_counter_and_flag() {
    let store = SqliteStore::open_in_memory().unwrap();
    let key = SeriesKey::new("toonsite", "a");
    store.upsert_series(&series("a", SeriesStatus::Ongoing, chapters(1))).await.unwrap();

    assert_eq!(store.mark_failed(&key, "timeout").await.unwrap(), 1);
    assert_eq!(store.mark_failed(&key, "timeout").await.unwrap(), 2);
    let loaded = store.get_series(&key).await.unwrap().unwrap();
    assert_eq!(loaded.last_failure.as_deref(), Some("timeout"));

    store.flag_series(&key, "2 consecutive failures").await.unwrap();
    assert!(store.get_series_due_for_check(None).await.unwrap().is_empty());

    store.clear_flag(&key).await.unwrap();
    let loaded = store.get_series(&key).await.unwrap().unwrap();
    assert!(loaded.flagged_reason.is_none());
    assert_eq!(loaded.consecutive_failures, 0);

    let unknown = SeriesKey::new("toonsite", "zzz");
    assert!(store.mark_failed(&unknown, "x").await.is_err());
    assert!(store.flag_series(&unknown, "x").await.is_err());
}

#[tokio::test]
async fn test_remove_series_drops_chapters() {
    let store = SqliteStore::open_in_memory().unwrap();
    let stored = series("a", SeriesStatus::Ongoing, chapters(2));
    store.upsert_series(&stored).await.unwrap();

    assert!(store.remove_series(&stored.key).await.unwrap());
    assert!(!store.remove_series(&stored.key).await.unwrap());
    assert!(store.get_series(&stored.key).await.unwrap().is_none());

    // re-adding starts from a clean chapter table
    store.upsert_series(&series("a", SeriesStatus::Ongoing, chapters(1))).await.unwrap();
    assert_eq!(store.get_series(&stored.key).await.unwrap().unwrap().chapters.len(), 1);
}
