//! Site adapters.
//!
//! Every source is served through one [`Scanlator`] trait object. Its default
//! methods evaluate the site descriptor held by the adapter's [`SiteContext`];
//! adapters under [`custom`] override the steps their site needs.

pub mod basic;
pub mod custom;

pub use basic::{BasicScanlator, DynamicIds, SiteContext};

use crate::descriptor::{RequestKind, SiteDescriptor};
use crate::diff::{self, DiffOptions};
use crate::error::ScanError;
use crate::models::{Chapter, ChapterUpdate, PartialSeries, Series, SeriesKey, SeriesStatus};
use async_trait::async_trait;

#[async_trait]
pub trait Scanlator: Send + Sync {
    fn context(&self) -> &SiteContext;

    fn name(&self) -> &str {
        &self.context().name
    }

    fn descriptor(&self) -> &SiteDescriptor {
        &self.context().site
    }

    fn request_kind(&self) -> RequestKind {
        self.descriptor().request_method
    }

    fn url_pattern(&self) -> &str {
        self.descriptor().url_regex.as_str()
    }

    fn owns_url(&self, url: &str) -> bool {
        self.context().owns_url(url)
    }

    fn check_interval_mins(&self) -> Option<u64> {
        self.descriptor().check_interval_mins
    }

    fn supports_front_page(&self) -> bool {
        self.descriptor().supports_front_page()
    }

    fn supports_search(&self) -> bool {
        self.descriptor().supports_search()
    }

    /// Source-local id of the series behind `url`. Applying it to the
    /// canonical URL of a series yields the same id.
    fn get_manga_id(&self, url: &str) -> Result<String, ScanError> {
        self.context().manga_id(url)
    }

    /// Canonical form of a series URL, as stored in the catalog.
    fn canonical_url(&self, url: &str) -> String {
        self.context()
            .series_page_url(url)
            .unwrap_or_else(|_| url.to_string())
    }

    fn get_title(&self, markup: &str) -> Result<String, ScanError> {
        self.context().extract_title(markup)
    }

    fn get_synopsis(&self, markup: &str) -> Option<String> {
        self.context().extract_synopsis(markup)
    }

    fn get_cover(&self, markup: &str) -> Option<String> {
        self.context().extract_cover(markup)
    }

    fn get_status(&self, markup: &str) -> SeriesStatus {
        self.context().extract_status(markup)
    }

    /// Full chapter list of a series page, oldest first.
    fn get_chapters(&self, markup: &str, series_url: &str) -> Result<Vec<Chapter>, ScanError> {
        Ok(self.context().extract_chapters(markup, series_url))
    }

    /// Stored chapter URL made fetchable (dynamic ids substituted).
    fn resolve_chapter_url(&self, url: &str) -> String {
        self.context().resolve_chapter_url(url)
    }

    async fn fetch_markup(&self, series_url: &str) -> Result<String, ScanError> {
        self.context().fetch_series_page(series_url).await
    }

    /// Chapter list for a series whose page is `markup`. Sites that serve
    /// chapters from a separate endpoint are asked for it here.
    async fn fetch_chapters(&self, series_url: &str, markup: &str) -> Result<Vec<Chapter>, ScanError> {
        match self.context().fetch_chapter_page(series_url).await? {
            Some(chapter_markup) => self.get_chapters(&chapter_markup, series_url),
            None => self.get_chapters(markup, series_url),
        }
    }

    async fn get_front_page(&self) -> Result<Vec<PartialSeries>, ScanError> {
        self.context().front_page().await
    }

    async fn search(&self, query: &str) -> Result<Vec<PartialSeries>, ScanError> {
        self.context().search(query).await
    }

    /// Diff `series` against an already fetched series page.
    fn check_updates(
        &self,
        series: &Series,
        latest_markup: &str,
        options: DiffOptions,
    ) -> Result<ChapterUpdate, ScanError> {
        let chapters = self.get_chapters(latest_markup, &series.url)?;
        diff::build_update(
            series,
            &chapters,
            self.get_status(latest_markup),
            self.get_cover(latest_markup),
            options,
        )
    }

    /// Fetch the series page (and chapter endpoint) and diff against `series`.
    async fn poll_series(&self, series: &Series, options: DiffOptions) -> Result<ChapterUpdate, ScanError> {
        let markup = self.fetch_markup(&series.url).await?;
        let chapters = self.fetch_chapters(&series.url, &markup).await?;
        diff::build_update(
            series,
            &chapters,
            self.get_status(&markup),
            self.get_cover(&markup),
            options,
        )
    }

    /// Build a complete series from its URL, for a user starting to track it.
    async fn fetch_series(&self, url: &str) -> Result<Series, ScanError> {
        let series_url = self.canonical_url(url);
        let markup = self.fetch_markup(&series_url).await?;
        let title = self.get_title(&markup)?;
        let id = match self.get_manga_id(url) {
            Ok(id) => id,
            Err(_) if self.descriptor().properties.dynamic_url => {
                let id = self.context().synthesize_id(&title);
                log::info!("[{}] {} carries no id, using '{}'", self.name(), url, id);
                id
            }
            Err(e) => return Err(e),
        };
        let chapters = self.fetch_chapters(&series_url, &markup).await?;

        log::info!(
            "[{}] Fetched '{}' with {} chapters",
            self.name(),
            title,
            chapters.len()
        );
        Ok(Series {
            key: SeriesKey::new(self.name(), id),
            title,
            url: series_url,
            synopsis: self.get_synopsis(&markup),
            cover_url: self.get_cover(&markup),
            status: self.get_status(&markup),
            chapters,
            has_front_page_entry: self.supports_front_page(),
            consecutive_failures: 0,
            last_failure: None,
            flagged_reason: None,
            last_checked_at: Some(chrono::Utc::now()),
        })
    }
}
