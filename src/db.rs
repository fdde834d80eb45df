use crate::error::ScanError;
use crate::models::{Chapter, Series, SeriesHeader, SeriesKey, SeriesStatus};
use crate::store::{missing, SeriesStore};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row, Transaction};
use std::path::Path;
use std::sync::Mutex;

pub fn create_tables(conn: &Connection) -> Result<()> {
    log::info!("Creating tables if not exists...");

    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS series (
            source TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            synopsis TEXT,
            cover_url TEXT,
            status TEXT NOT NULL DEFAULT 'unknown',
            has_front_page_entry INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_failure TEXT,
            flagged_reason TEXT,
            last_checked_at INTEGER,
            PRIMARY KEY (source, id)
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters (
            source TEXT NOT NULL,
            series_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            is_premium INTEGER NOT NULL DEFAULT 0,
            no_public_url INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (source, series_id, idx),
            FOREIGN KEY (source, series_id) REFERENCES series (source, id) ON DELETE CASCADE
        );",
        [],
    )?;

    // Migrations for existing DBs: add missing columns
    ensure_column(conn, "series", "flagged_reason", "TEXT")?;
    ensure_column(conn, "series", "last_checked_at", "INTEGER")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_series_source ON series(source);",
        [],
    )?;

    log::info!("Tables ensured.");
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, column_type: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut exists = false;
    for r in rows {
        if r? == column {
            exists = true;
            break;
        }
    }
    if !exists {
        log::info!("Adding column {}.{}", table, column);
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type),
            params![],
        )?;
    }
    Ok(())
}

const SERIES_COLUMNS: &str = "source, id, title, url, synopsis, cover_url, status, has_front_page_entry, \
     consecutive_failures, last_failure, flagged_reason, last_checked_at";

fn series_from_row(row: &Row<'_>) -> Result<Series> {
    let status: String = row.get(6)?;
    let checked: Option<i64> = row.get(11)?;
    Ok(Series {
        key: SeriesKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        title: row.get(2)?,
        url: row.get(3)?,
        synopsis: row.get(4)?,
        cover_url: row.get(5)?,
        status: SeriesStatus::parse(&status),
        chapters: Vec::new(),
        has_front_page_entry: row.get(7)?,
        consecutive_failures: row.get(8)?,
        last_failure: row.get(9)?,
        flagged_reason: row.get(10)?,
        last_checked_at: checked.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
    })
}

fn chapter_from_row(row: &Row<'_>) -> Result<Chapter> {
    Ok(Chapter {
        index: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        is_premium: row.get(3)?,
        no_public_url: row.get(4)?,
    })
}

pub fn get_series(conn: &Connection, key: &SeriesKey) -> Result<Option<Series>> {
    let sql = format!("SELECT {} FROM series WHERE source = ?1 AND id = ?2", SERIES_COLUMNS);
    let Some(mut series) = conn
        .query_row(&sql, params![key.source, key.id], series_from_row)
        .optional()?
    else {
        return Ok(None);
    };
    series.chapters = get_chapters(conn, key)?;
    Ok(Some(series))
}

pub fn get_chapters(conn: &Connection, key: &SeriesKey) -> Result<Vec<Chapter>> {
    let mut stmt = conn.prepare(
        "SELECT idx, name, url, is_premium, no_public_url FROM chapters
         WHERE source = ?1 AND series_id = ?2 ORDER BY idx",
    )?;
    let rows = stmt.query_map(params![key.source, key.id], chapter_from_row)?;
    let mut chapters = Vec::new();
    for row in rows {
        chapters.push(row?);
    }
    Ok(chapters)
}

/// Replace the series row and its chapter list.
pub fn upsert_series(tx: &Transaction, series: &Series) -> Result<()> {
    tx.execute(
        "INSERT INTO series (source, id, title, url, synopsis, cover_url, status, has_front_page_entry,
                             consecutive_failures, last_failure, flagged_reason, last_checked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(source, id) DO UPDATE SET
            title=excluded.title,
            url=excluded.url,
            synopsis=excluded.synopsis,
            cover_url=excluded.cover_url,
            status=excluded.status,
            has_front_page_entry=excluded.has_front_page_entry,
            consecutive_failures=excluded.consecutive_failures,
            last_failure=excluded.last_failure,
            flagged_reason=excluded.flagged_reason,
            last_checked_at=excluded.last_checked_at",
        params![
            series.key.source,
            series.key.id,
            series.title,
            series.url,
            series.synopsis,
            series.cover_url,
            series.status.as_str(),
            series.has_front_page_entry,
            series.consecutive_failures,
            series.last_failure,
            series.flagged_reason,
            series.last_checked_at.map(|t| t.timestamp()),
        ],
    )?;

    tx.execute(
        "DELETE FROM chapters WHERE source = ?1 AND series_id = ?2",
        params![series.key.source, series.key.id],
    )?;
    let mut stmt = tx.prepare(
        "INSERT INTO chapters (source, series_id, idx, name, url, is_premium, no_public_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for chapter in &series.chapters {
        stmt.execute(params![
            series.key.source,
            series.key.id,
            chapter.index,
            chapter.name,
            chapter.url,
            chapter.is_premium,
            chapter.no_public_url,
        ])?;
    }
    Ok(())
}

pub fn due_for_check(conn: &Connection, source: Option<&str>) -> Result<Vec<SeriesHeader>> {
    let mut stmt = conn.prepare(
        "SELECT s.source, s.id, s.url, s.status, s.has_front_page_entry, s.consecutive_failures,
                (SELECT COUNT(*) FROM chapters c WHERE c.source = s.source AND c.series_id = s.id),
                c.idx, c.name, c.url, c.is_premium, c.no_public_url
         FROM series s
         LEFT JOIN chapters c ON c.source = s.source AND c.series_id = s.id
              AND c.idx = (SELECT MAX(idx) FROM chapters m WHERE m.source = s.source AND m.series_id = s.id)
         WHERE s.status NOT IN ('completed', 'dropped')
           AND s.flagged_reason IS NULL
           AND (?1 IS NULL OR s.source = ?1)
         ORDER BY s.source, s.id",
    )?;
    let rows = stmt.query_map(params![source], |row| {
        let status: String = row.get(3)?;
        let chapter_count: i64 = row.get(6)?;
        let last_index: Option<u32> = row.get(7)?;
        let last_chapter = match last_index {
            Some(index) => Some(Chapter {
                index,
                name: row.get(8)?,
                url: row.get(9)?,
                is_premium: row.get(10)?,
                no_public_url: row.get(11)?,
            }),
            None => None,
        };
        Ok(SeriesHeader {
            key: SeriesKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
            url: row.get(2)?,
            status: SeriesStatus::parse(&status),
            last_chapter,
            chapter_count: chapter_count.max(0) as usize,
            has_front_page_entry: row.get(4)?,
            consecutive_failures: row.get(5)?,
            flagged: false,
        })
    })?;
    let mut headers = Vec::new();
    for row in rows {
        headers.push(row?);
    }
    Ok(headers)
}

/// SQLite-backed catalog.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let conn = Connection::open(path.as_ref())?;
        create_tables(&conn)?;
        log::info!("Opened catalog at {}", path.as_ref().display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T, ScanError> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut conn).map_err(ScanError::from)
    }

    fn update_one(&self, key: &SeriesKey, sql: &str, reason: Option<&str>) -> Result<(), ScanError> {
        let changed = self.with_conn(|conn| match reason {
            Some(reason) => conn.execute(sql, params![key.source, key.id, reason]),
            None => conn.execute(sql, params![key.source, key.id]),
        })?;
        if changed == 0 {
            return Err(missing(key));
        }
        Ok(())
    }
}

#[async_trait]
impl SeriesStore for SqliteStore {
    async fn get_series(&self, key: &SeriesKey) -> Result<Option<Series>, ScanError> {
        self.with_conn(|conn| get_series(conn, key))
    }

    async fn upsert_series(&self, series: &Series) -> Result<(), ScanError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            upsert_series(&tx, series)?;
            tx.commit()
        })
        .map_err(|e| {
            log::error!("[{}] Failed to store '{}': {}", series.key.source, series.key.id, e);
            e
        })
    }

    async fn get_series_due_for_check(&self, source: Option<&str>) -> Result<Vec<SeriesHeader>, ScanError> {
        self.with_conn(|conn| due_for_check(conn, source))
    }

    async fn mark_failed(&self, key: &SeriesKey, reason: &str) -> Result<u32, ScanError> {
        let count = self.with_conn(|conn| {
            conn.query_row(
                "UPDATE series SET consecutive_failures = consecutive_failures + 1, last_failure = ?3
                 WHERE source = ?1 AND id = ?2
                 RETURNING consecutive_failures",
                params![key.source, key.id, reason],
                |row| row.get::<_, u32>(0),
            )
            .optional()
        })?;
        count.ok_or_else(|| missing(key))
    }

    async fn clear_failures(&self, key: &SeriesKey) -> Result<(), ScanError> {
        self.update_one(
            key,
            "UPDATE series SET consecutive_failures = 0, last_failure = NULL WHERE source = ?1 AND id = ?2",
            None,
        )
    }

    async fn flag_series(&self, key: &SeriesKey, reason: &str) -> Result<(), ScanError> {
        self.update_one(
            key,
            "UPDATE series SET flagged_reason = ?3 WHERE source = ?1 AND id = ?2",
            Some(reason),
        )
    }

    async fn clear_flag(&self, key: &SeriesKey) -> Result<(), ScanError> {
        self.update_one(
            key,
            "UPDATE series SET flagged_reason = NULL, consecutive_failures = 0 WHERE source = ?1 AND id = ?2",
            None,
        )
    }

    async fn remove_series(&self, key: &SeriesKey) -> Result<bool, ScanError> {
        let removed = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chapters WHERE source = ?1 AND series_id = ?2",
                params![key.source, key.id],
            )?;
            let removed = tx.execute(
                "DELETE FROM series WHERE source = ?1 AND id = ?2",
                params![key.source, key.id],
            )?;
            tx.commit()?;
            Ok(removed > 0)
        })?;
        if removed {
            log::info!("[{}] Removed '{}' from the catalog", key.source, key.id);
        }
        Ok(removed)
    }
}
