//! Update-check engine.
//!
//! A sweep walks every enabled source concurrently (bounded by
//! `max_concurrent_sources`); inside one source the series are checked one
//! after the other with a fixed delay between requests. Failures are
//! attributed to the series they happened on and never leave the sweep.

use crate::diff::{self, DiffOptions};
use crate::error::{ErrorKind, ScanError};
use crate::metrics::{track_request, MetricsTracker};
use crate::models::{ChapterUpdate, PartialSeries, Series, SeriesHeader, SeriesKey, SeriesStatus, UpdateKind};
use crate::notify::Notifier;
use crate::registry::ScanlatorRegistry;
use crate::scanlators::Scanlator;
use crate::store::SeriesStore;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay between two requests to the same source.
    pub request_delay: Duration,
    /// Consecutive failures after which a series is flagged.
    pub failure_threshold: u32,
    pub max_concurrent_sources: usize,
    pub include_premium: bool,
    pub default_interval: Duration,
    /// Per-source interval overrides from the configuration file. They take
    /// precedence over the descriptor's `check_interval_mins`.
    pub source_intervals: HashMap<String, Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(20),
            failure_threshold: 5,
            max_concurrent_sources: 10,
            include_premium: false,
            default_interval: Duration::from_secs(25 * 60),
            source_intervals: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Front pages where available, only sources whose interval elapsed.
    FrontPage,
    /// Every series of every source fetched individually.
    Full,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub used_front_page: bool,
    pub checked: usize,
    pub updated: usize,
    pub notified: usize,
    pub failed: usize,
    pub flagged: usize,
    /// Series left for the next sweep after a source-level failure.
    pub skipped: usize,
    pub aborted: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl SweepReport {
    pub fn checked(&self) -> usize {
        self.sources.iter().map(|s| s.checked).sum()
    }

    pub fn updated(&self) -> usize {
        self.sources.iter().map(|s| s.updated).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }

    pub fn source(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == name)
    }
}

/// Spaces out requests to one source.
struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

enum FrontPageMatch {
    Unchanged,
    Update(Series, ChapterUpdate),
    NeedsPoll,
}

pub struct UpdateEngine {
    registry: Arc<ScanlatorRegistry>,
    store: Arc<dyn SeriesStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsTracker>,
    settings: EngineSettings,
    sweep_lock: tokio::sync::Mutex<()>,
    last_source_check: Mutex<HashMap<String, Instant>>,
}

impl UpdateEngine {
    pub fn new(
        registry: Arc<ScanlatorRegistry>,
        store: Arc<dyn SeriesStore>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            metrics: Arc::new(MetricsTracker::new()),
            settings,
            sweep_lock: tokio::sync::Mutex::new(()),
            last_source_check: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsTracker>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsTracker> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<ScanlatorRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            include_premium: self.settings.include_premium,
        }
    }

    pub fn source_interval(&self, scanlator: &dyn Scanlator) -> Duration {
        self.settings
            .source_intervals
            .get(scanlator.name())
            .copied()
            .or_else(|| {
                scanlator
                    .check_interval_mins()
                    .map(|mins| Duration::from_secs(mins * 60))
            })
            .unwrap_or(self.settings.default_interval)
    }

    /// Shortest interval of any enabled source; the primary schedule ticks
    /// at this rate.
    pub fn tick_interval(&self) -> Duration {
        self.registry
            .all_enabled()
            .iter()
            .map(|s| self.source_interval(s.as_ref()))
            .min()
            .unwrap_or(self.settings.default_interval)
            .min(self.settings.default_interval)
    }

    fn source_due(&self, name: &str, interval: Duration) -> bool {
        let last = self.last_source_check.lock().unwrap_or_else(|p| p.into_inner());
        match last.get(name) {
            Some(at) => at.elapsed() >= interval,
            None => true,
        }
    }

    fn mark_source_checked(&self, name: &str) {
        self.last_source_check
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), Instant::now());
    }

    /// Run one sweep. Fails with `SweepInProgress` if another sweep holds
    /// the engine.
    pub async fn run_sweep(&self, kind: SweepKind) -> Result<SweepReport, ScanError> {
        let _guard = self.sweep_lock.try_lock().map_err(|_| ScanError::SweepInProgress)?;
        let started_at = Utc::now();

        let sources: Vec<Arc<dyn Scanlator>> = self
            .registry
            .all_enabled()
            .into_iter()
            .filter(|s| kind == SweepKind::Full || self.source_due(s.name(), self.source_interval(s.as_ref())))
            .collect();
        log::info!("Starting {:?} sweep over {} sources", kind, sources.len());

        let sweeps: Vec<_> = sources
            .into_iter()
            .map(|scanlator| {
                async move {
                    let report = self.sweep_source(scanlator.as_ref(), kind).await;
                    if kind == SweepKind::FrontPage {
                        self.mark_source_checked(scanlator.name());
                    }
                    report
                }
                .boxed()
            })
            .collect();
        let mut reports: Vec<SourceReport> = stream::iter(sweeps)
            .buffer_unordered(self.settings.max_concurrent_sources.max(1))
            .collect()
            .await;
        reports.sort_by(|a, b| a.source.cmp(&b.source));

        let report = SweepReport {
            kind,
            started_at,
            finished_at: Utc::now(),
            sources: reports,
        };
        log::info!(
            "{:?} sweep done: {} checked, {} updated, {} failed in {}s",
            kind,
            report.checked(),
            report.updated(),
            report.failed(),
            (report.finished_at - report.started_at).num_seconds()
        );
        Ok(report)
    }

    async fn sweep_source(&self, scanlator: &dyn Scanlator, kind: SweepKind) -> SourceReport {
        let name = scanlator.name().to_string();
        let mut report = SourceReport {
            source: name.clone(),
            ..SourceReport::default()
        };

        let headers = match self.store.get_series_due_for_check(Some(&name)).await {
            Ok(headers) => headers,
            Err(e) => {
                log::error!("[{}] Could not list tracked series: {}", name, e);
                report.aborted = Some(e.to_string());
                return report;
            }
        };
        if headers.is_empty() {
            return report;
        }

        let mut pacer = Pacer::new(self.settings.request_delay);
        let to_poll = if kind == SweepKind::FrontPage && scanlator.supports_front_page() {
            pacer.wait().await;
            match track_request(&self.metrics, &name, scanlator.get_front_page()).await {
                Ok(partials) => {
                    report.used_front_page = true;
                    self.match_front_page(scanlator, headers, partials, &mut report).await
                }
                Err(e) if e.is_source_level() => {
                    log::warn!(
                        "[{}] Front page failed, skipping {} series this sweep: {}",
                        name,
                        headers.len(),
                        e
                    );
                    report.skipped = headers.len();
                    report.aborted = Some(e.to_string());
                    return report;
                }
                Err(e) => {
                    log::warn!("[{}] Front page unusable, checking series one by one: {}", name, e);
                    headers
                }
            }
        } else {
            headers
        };

        let total = to_poll.len();
        for (position, header) in to_poll.into_iter().enumerate() {
            pacer.wait().await;
            if let Err(e) = self.poll_one(scanlator, &header, &mut report).await {
                if e.is_source_level() {
                    let remaining = total - position - 1;
                    log::warn!(
                        "[{}] Giving up on the source for this sweep ({} series left): {}",
                        name,
                        remaining,
                        e
                    );
                    report.skipped += remaining;
                    report.aborted = Some(e.to_string());
                    break;
                }
            }
        }
        report
    }

    /// Settle whatever the front page can settle. Returns the series that
    /// still need an individual fetch.
    async fn match_front_page(
        &self,
        scanlator: &dyn Scanlator,
        headers: Vec<SeriesHeader>,
        partials: Vec<PartialSeries>,
        report: &mut SourceReport,
    ) -> Vec<SeriesHeader> {
        let by_key: HashMap<SeriesKey, PartialSeries> =
            partials.into_iter().map(|p| (p.key.clone(), p)).collect();
        let mut to_poll = Vec::new();

        for header in headers {
            let Some(partial) = by_key.get(&header.key) else {
                // sites with a short listing: series that never show up there
                // are fetched directly
                if !header.has_front_page_entry {
                    to_poll.push(header);
                }
                continue;
            };
            report.checked += 1;
            match self.front_page_update(&header, partial).await {
                Ok(FrontPageMatch::Unchanged) => {}
                Ok(FrontPageMatch::Update(series, update)) => {
                    if let Err(e) = self.commit(scanlator, series, update, true, report).await {
                        log::error!("[{}] Failed to commit '{}': {}", header.key.source, header.key.id, e);
                    }
                }
                Ok(FrontPageMatch::NeedsPoll) => {
                    report.checked -= 1;
                    to_poll.push(header);
                }
                Err(e) => {
                    report.failed += 1;
                    self.record_failure(&header.key, &e, report).await;
                }
            }
        }
        to_poll
    }

    async fn front_page_update(
        &self,
        header: &SeriesHeader,
        partial: &PartialSeries,
    ) -> Result<FrontPageMatch, ScanError> {
        let Some(listed_last) = partial.latest_chapters.last() else {
            return Ok(FrontPageMatch::NeedsPoll);
        };
        if let Some(stored_last) = &header.last_chapter {
            if stored_last.identity() == listed_last.identity()
                && stored_last.is_premium == listed_last.is_premium
                && header.has_front_page_entry
            {
                return Ok(FrontPageMatch::Unchanged);
            }
        }

        let Some(series) = self.store.get_series(&header.key).await? else {
            return Ok(FrontPageMatch::Unchanged);
        };
        if !series.chapters.is_empty() && !diff::has_anchor(&series.chapters, &partial.latest_chapters) {
            // more was released than the listing shows
            return Ok(FrontPageMatch::NeedsPoll);
        }
        let update = diff::build_update(
            &series,
            &partial.latest_chapters,
            SeriesStatus::Unknown,
            None,
            self.diff_options(),
        )?;
        Ok(FrontPageMatch::Update(series, update))
    }

    async fn poll_one(
        &self,
        scanlator: &dyn Scanlator,
        header: &SeriesHeader,
        report: &mut SourceReport,
    ) -> Result<(), ScanError> {
        let series = match self.store.get_series(&header.key).await {
            Ok(Some(series)) => series,
            Ok(None) => return Ok(()),
            Err(e) => {
                log::error!("[{}] Could not load '{}': {}", header.key.source, header.key.id, e);
                return Ok(());
            }
        };
        report.checked += 1;

        let result = track_request(
            &self.metrics,
            scanlator.name(),
            scanlator.poll_series(&series, self.diff_options()),
        )
        .await;

        match result {
            Ok(update) if update.kind == UpdateKind::Unavailable => {
                report.failed += 1;
                let e = ScanError::parse(scanlator.name(), &series.url, "chapter list (empty after earlier success)");
                self.record_failure(&series.key, &e, report).await;
                Ok(())
            }
            Ok(update) => self.commit(scanlator, series, update, false, report).await,
            Err(e) => {
                report.failed += 1;
                self.record_failure(&series.key, &e, report).await;
                Err(e)
            }
        }
    }

    /// Persist an update as one write, then hand it to the notifier.
    async fn commit(
        &self,
        scanlator: &dyn Scanlator,
        mut series: Series,
        update: ChapterUpdate,
        seen_on_front_page: bool,
        report: &mut SourceReport,
    ) -> Result<(), ScanError> {
        let gained_front_page = seen_on_front_page && !series.has_front_page_entry;

        if update.changes_series() || gained_front_page {
            series.apply_update(&update);
            series.has_front_page_entry |= gained_front_page;
            self.store.upsert_series(&series).await?;
            if update.changes_series() {
                report.updated += 1;
            }
        } else if series.consecutive_failures > 0 {
            self.store.clear_failures(&series.key).await?;
        }

        if update.is_notifiable() {
            report.notified += 1;
            self.notifier.emit(resolve_urls(scanlator, update));
        }
        Ok(())
    }

    async fn record_failure(&self, key: &SeriesKey, error: &ScanError, report: &mut SourceReport) {
        log::warn!("[{}] Check of '{}' failed: {}", key.source, key.id, error);

        if error.kind() == ErrorKind::Anomaly {
            log::error!(
                "[{}] '{}' needs manual review: {}",
                key.source,
                key.id,
                error
            );
            self.flag(key, &error.to_string(), report).await;
            return;
        }

        match self.store.mark_failed(key, &error.to_string()).await {
            Ok(count) if count >= self.settings.failure_threshold => {
                log::error!(
                    "[{}] '{}' failed {} checks in a row, flagging for an operator: {}",
                    key.source,
                    key.id,
                    count,
                    error
                );
                self.flag(key, &format!("{} consecutive failures, last: {}", count, error), report)
                    .await;
            }
            Ok(_) => {}
            Err(e) => log::error!("[{}] Could not record failure of '{}': {}", key.source, key.id, e),
        }
    }

    async fn flag(&self, key: &SeriesKey, reason: &str, report: &mut SourceReport) {
        match self.store.flag_series(key, reason).await {
            Ok(()) => {
                report.flagged += 1;
                self.metrics.record_flagged(&key.source);
            }
            Err(e) => log::error!("[{}] Could not flag '{}': {}", key.source, key.id, e),
        }
    }

    /// Check one stored series right away, outside of any sweep.
    pub async fn check_series(&self, key: &SeriesKey) -> Result<ChapterUpdate, ScanError> {
        let scanlator = self.registry.resolve_by_name(&key.source)?;
        let series = self
            .store
            .get_series(key)
            .await?
            .ok_or_else(|| ScanError::Storage(format!("series {} is not stored", key)))?;
        let update = scanlator.poll_series(&series, self.diff_options()).await?;
        if update.changes_series() {
            let mut series = series;
            series.apply_update(&update);
            self.store.upsert_series(&series).await?;
        }
        Ok(update)
    }

    /// Start tracking the series behind `url`. Already tracked series are
    /// returned as stored.
    pub async fn track(&self, url: &str) -> Result<Series, ScanError> {
        let scanlator = self.registry.resolve_by_url(url)?;
        if let Ok(id) = scanlator.get_manga_id(url) {
            let key = SeriesKey::new(scanlator.name(), id);
            if let Some(existing) = self.store.get_series(&key).await? {
                return Ok(existing);
            }
        }
        let series = scanlator.fetch_series(url).await?;
        self.store.upsert_series(&series).await?;
        log::info!(
            "[{}] Now tracking '{}' ({} chapters)",
            series.key.source,
            series.title,
            series.chapters.len()
        );
        Ok(series)
    }

    /// Search every enabled source that supports it. Sources that fail are
    /// logged and left out.
    pub async fn search(&self, query: &str) -> Vec<PartialSeries> {
        let sources: Vec<Arc<dyn Scanlator>> = self
            .registry
            .all_enabled()
            .into_iter()
            .filter(|s| s.supports_search())
            .collect();
        let results: Vec<Vec<PartialSeries>> = stream::iter(sources)
            .map(|scanlator| async move {
                match scanlator.search(query).await {
                    Ok(found) => found,
                    Err(e) => {
                        log::warn!("[{}] Search for '{}' failed: {}", scanlator.name(), query, e);
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.settings.max_concurrent_sources.max(1))
            .collect()
            .await;
        results.into_iter().flatten().collect()
    }
}

fn resolve_urls(scanlator: &dyn Scanlator, mut update: ChapterUpdate) -> ChapterUpdate {
    for chapter in update
        .new_chapters
        .iter_mut()
        .chain(update.unlocked_chapters.iter_mut())
        .chain(update.notify_chapters.iter_mut())
    {
        chapter.url = scanlator.resolve_chapter_url(&chapter.url);
    }
    update
}
