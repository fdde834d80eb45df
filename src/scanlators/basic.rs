//! Descriptor-driven extraction shared by every adapter.
//!
//! `SiteContext` evaluates a site descriptor against fetched markup. The
//! default methods of [`Scanlator`](super::Scanlator) delegate here, so
//! a [`BasicScanlator`] is nothing more than a context; custom adapters
//! embed a context and override the steps the descriptor cannot express.

use super::Scanlator;
use crate::descriptor::{
    ChapterOrder, ChapterSelectors, ListingSelectors, PaidChapterUrl, QueryEncoding, SearchPlacement,
    SiteDescriptor, ID_PLACEHOLDER,
};
use crate::error::ScanError;
use crate::helpers;
use crate::html;
use crate::models::{Chapter, PartialSeries, SeriesKey, SeriesStatus};
use crate::request::{FetchRequest, Fetcher};
use chrono::Utc;
use scraper::ElementRef;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Ids a dynamic-URL site currently embeds in its links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicIds {
    pub series: Option<String>,
    pub chapter: Option<String>,
}

pub struct SiteContext {
    pub name: String,
    pub site: SiteDescriptor,
    pub fetcher: Arc<Fetcher>,
    dynamic_ids: RwLock<DynamicIds>,
}

impl SiteContext {
    pub fn new(name: impl Into<String>, site: SiteDescriptor, fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: name.into(),
            site,
            fetcher,
            dynamic_ids: RwLock::new(DynamicIds::default()),
        }
    }

    // ---- requests ----

    pub fn request(&self, url: &str) -> FetchRequest {
        FetchRequest::get(url).with_headers(self.site.request_headers())
    }

    pub async fn get_text(&self, request: FetchRequest) -> Result<String, ScanError> {
        self.fetcher
            .fetch_text(self.site.request_method, &request)
            .await
    }

    /// Fetch a series page. Dynamic-URL sites get the current id substituted
    /// and, on a 404, one retry without it.
    pub async fn fetch_series_page(&self, series_url: &str) -> Result<String, ScanError> {
        let page_url = self.series_page_url(series_url)?;
        if !self.site.properties.dynamic_url {
            return self.get_text(self.request(&page_url)).await;
        }

        let loaded = self.load_url(&page_url, self.ids().series.as_deref());
        match self.get_text(self.request(&loaded)).await {
            Err(ScanError::NotFound { .. }) if loaded != self.load_url(&page_url, None) => {
                log::warn!(
                    "[{}] 404 on {}, retrying without the site id",
                    self.name,
                    loaded
                );
                self.get_text(self.request(&self.load_url(&page_url, None))).await
            }
            other => other,
        }
    }

    /// Chapter list markup when the site serves it from a separate endpoint.
    pub async fn fetch_chapter_page(&self, series_url: &str) -> Result<Option<String>, ScanError> {
        let Some(method) = self.site.chapter_ajax else {
            return Ok(None);
        };
        let Some(template) = &self.site.properties.format_urls.ajax else {
            return Ok(None);
        };
        let url = self.fill_template(template, series_url)?;
        let url = self.load_url(&url, self.ids().series.as_deref());
        let request = self.request(&url).with_method(method);
        self.get_text(request).await.map(Some)
    }

    // ---- url handling ----

    pub fn owns_url(&self, url: &str) -> bool {
        self.site.url_regex.is_match(url)
    }

    fn capture(&self, url: &str, group: &str) -> Option<String> {
        let url = self.strip_placeholder(url);
        self.site
            .url_regex
            .captures(&url)
            .and_then(|c| c.name(group))
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn url_name(&self, url: &str) -> Option<String> {
        self.capture(url, "url_name")
    }

    /// Slug by default, the `id` group when the site embeds a stable id.
    /// Dynamic-URL sites always use the slug since their id rotates.
    pub fn manga_id(&self, url: &str) -> Result<String, ScanError> {
        if !self.site.properties.dynamic_url {
            if let Some(id) = self.capture(url, "id") {
                return Ok(id);
            }
        }
        self.url_name(url)
            .ok_or_else(|| ScanError::parse(&self.name, url, "series id"))
    }

    /// Id for a series whose URL carries no usable slug, built from its title.
    pub fn synthesize_id(&self, title: &str) -> String {
        let connector = self
            .site
            .properties
            .missing_id_connector
            .as_ref()
            .map(|c| c.connector.as_str())
            .unwrap_or("-");
        title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(connector)
    }

    fn fill_template(&self, template: &str, url: &str) -> Result<String, ScanError> {
        let url_name = self.url_name(url);
        if template.contains("{url_name}") && url_name.is_none() {
            return Err(ScanError::parse(&self.name, url, "url name"));
        }
        let id = if self.site.properties.dynamic_url {
            Some(ID_PLACEHOLDER.to_string())
        } else {
            self.capture(url, "id")
        };
        let filled = template
            .replace("{url_name}", url_name.as_deref().unwrap_or(""))
            .replace("{id}", id.as_deref().unwrap_or(""));
        Ok(filled)
    }

    /// Canonical series page URL for any URL this site owns.
    pub fn series_page_url(&self, url: &str) -> Result<String, ScanError> {
        self.fill_template(&self.site.properties.format_urls.manga, url)
    }

    fn connector_pieces(&self) -> Option<(String, bool)> {
        self.site
            .properties
            .missing_id_connector
            .as_ref()
            .map(|c| (c.connector.clone(), c.before_id))
    }

    fn placeholder_with_connector(&self) -> String {
        match self.connector_pieces() {
            Some((connector, true)) => format!("{}{}", connector, ID_PLACEHOLDER),
            Some((connector, false)) => format!("{}{}", ID_PLACEHOLDER, connector),
            None => ID_PLACEHOLDER.to_string(),
        }
    }

    fn strip_placeholder(&self, url: &str) -> String {
        if !url.contains(ID_PLACEHOLDER) {
            return url.to_string();
        }
        url.replace(&self.placeholder_with_connector(), "")
            .replace(ID_PLACEHOLDER, "")
    }

    /// Substitute `id` for the placeholder, or drop the placeholder and its
    /// connector when no id is known.
    pub fn load_url(&self, url: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => url.replace(ID_PLACEHOLDER, id),
            None => self.strip_placeholder(url),
        }
    }

    /// Replace the site's rotating id with the placeholder.
    pub fn unload_url(&self, url: &str) -> String {
        if !self.site.properties.dynamic_url || url.contains(ID_PLACEHOLDER) {
            return url.to_string();
        }
        let Some(rx) = &self.site.properties.chapter_regex else {
            return url.to_string();
        };
        match rx.captures(url) {
            Some(c) => match (c.name("before_id"), c.name("after_id")) {
                (Some(before), Some(after)) => format!(
                    "{}{}{}",
                    before.as_str(),
                    self.placeholder_with_connector(),
                    after.as_str()
                ),
                _ => url.to_string(),
            },
            None => self.series_page_url(url).unwrap_or_else(|_| url.to_string()),
        }
    }

    pub fn ids(&self) -> DynamicIds {
        self.dynamic_ids
            .read()
            .map(|ids| ids.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Learn the ids currently in use from a front-page scrape (raw URLs).
    /// Older entries are looked at first since their links are the most
    /// likely to still be valid.
    pub fn learn_ids(&self, partials: &[PartialSeries]) {
        if !self.site.properties.dynamic_url {
            return;
        }
        let trimmed = |id: &str| {
            let id = id.trim_matches(|c: char| !c.is_alphanumeric());
            (!id.is_empty()).then(|| id.to_string())
        };
        let series_id_of = |url: &str| {
            self.site
                .url_regex
                .captures(url)
                .and_then(|c| c.name("id"))
                .and_then(|m| trimmed(m.as_str()))
        };
        // the chapter id sits between the `before_id` and `after_id` groups
        let chapter_id_of = |url: &str| {
            let c = self.site.properties.chapter_regex.as_ref()?.captures(url)?;
            let start = c.name("before_id")?.end();
            let end = c.name("after_id")?.start();
            url.get(start..end).and_then(trimmed)
        };

        let mut learned = DynamicIds::default();
        for partial in partials.iter().rev() {
            if learned.series.is_none() {
                learned.series = series_id_of(&partial.url);
            }
            if learned.chapter.is_none() {
                learned.chapter = partial.latest_chapters.iter().find_map(|c| chapter_id_of(&c.url));
            }
            if learned.series.is_some() && learned.chapter.is_some() {
                break;
            }
        }

        if learned.series.is_some() || learned.chapter.is_some() {
            log::debug!("[{}] Learned dynamic ids {:?}", self.name, learned);
            let mut ids = self.dynamic_ids.write().unwrap_or_else(|p| p.into_inner());
            if learned.series.is_some() {
                ids.series = learned.series;
            }
            if learned.chapter.is_some() {
                ids.chapter = learned.chapter;
            }
        }
    }

    pub fn resolve_chapter_url(&self, url: &str) -> String {
        if !self.site.properties.dynamic_url {
            return url.to_string();
        }
        self.load_url(url, self.ids().chapter.as_deref())
    }

    fn chapter_link(&self, href: &str) -> String {
        let base = self.site.base_url();
        if href.starts_with("http://") || href.starts_with("https://") || href.starts_with("//") {
            return html::absolutize(base, href);
        }
        match &self.site.properties.url_chapter_prefix {
            Some(prefix) => format!(
                "{}/{}/{}",
                base,
                prefix.trim_matches('/'),
                href.trim_start_matches('/')
            ),
            None => html::absolutize(base, href),
        }
    }

    // ---- series page extraction ----

    pub fn extract_title(&self, markup: &str) -> Result<String, ScanError> {
        let document = html::parse_document(markup, &self.site.selectors.unwanted_tags);
        let root = document.root_element();
        self.site
            .selectors
            .title
            .iter()
            .find_map(|target| html::extract_value(root, target))
            .ok_or_else(|| ScanError::parse(&self.name, &self.site.properties.base_url, "title"))
    }

    pub fn extract_synopsis(&self, markup: &str) -> Option<String> {
        let target = self.site.selectors.synopsis.as_ref()?;
        let document = html::parse_document(markup, &self.site.selectors.unwanted_tags);
        let element = html::select_first(document.root_element(), target)?;
        let text = html::element_text_lines(element);
        (!text.is_empty()).then_some(text)
    }

    pub fn extract_cover(&self, markup: &str) -> Option<String> {
        let document = html::parse_document(markup, &self.site.selectors.unwanted_tags);
        let root = document.root_element();
        self.site.selectors.cover.iter().find_map(|target| {
            let element = html::select_first(root, target)?;
            html::extract_cover_link(element, self.site.base_url())
        })
    }

    pub fn status_texts(&self, markup: &str) -> Vec<String> {
        let document = html::parse_document(markup, &self.site.selectors.unwanted_tags);
        let root = document.root_element();
        let mut texts = Vec::new();
        for target in &self.site.selectors.status {
            match target.css() {
                Some(css) => texts.extend(
                    html::select_all(root, css)
                        .into_iter()
                        .map(html::element_text)
                        .filter(|t| !t.is_empty()),
                ),
                None => texts.push(html::element_text(root)),
            }
        }
        texts
    }

    pub fn status_from_text(&self, text: &str) -> SeriesStatus {
        let properties = &self.site.properties;
        if properties.no_status {
            helpers::infer_status_from_release(
                text,
                &properties.time_formats,
                properties.stale_after_days,
                Utc::now(),
            )
        } else {
            helpers::parse_status(text)
        }
    }

    pub fn extract_status(&self, markup: &str) -> SeriesStatus {
        self.status_texts(markup)
            .first()
            .map(|text| self.status_from_text(text))
            .unwrap_or(SeriesStatus::Unknown)
    }

    pub fn extract_chapters(&self, markup: &str, series_url: &str) -> Vec<Chapter> {
        let document = html::parse_document(markup, &self.site.selectors.unwanted_tags);
        let mut chapters = self.chapters_in(document.root_element(), &self.site.selectors.chapters, series_url);
        for chapter in &mut chapters {
            chapter.url = self.unload_url(&chapter.url);
        }
        chapters
    }

    /// Swap the site ids in a listing entry for the placeholder.
    fn unload_partial(&self, partial: &mut PartialSeries) {
        partial.url = self.unload_url(&partial.url);
        for chapter in &mut partial.latest_chapters {
            chapter.url = self.unload_url(&chapter.url);
        }
    }

    /// Chapters under `scope`, oldest first, indexed by position. Links are
    /// returned as found on the page.
    fn chapters_in(&self, scope: ElementRef<'_>, selectors: &ChapterSelectors, series_url: &str) -> Vec<Chapter> {
        let mut containers = html::select_all(scope, &selectors.container);
        if self.site.properties.chapter_order == ChapterOrder::NewestFirst {
            containers.reverse();
        }

        let mut chapters = Vec::with_capacity(containers.len());
        for container in containers {
            let index = chapters.len() as u32;
            let Some(raw_name) = html::extract_value(container, &selectors.name) else {
                log::debug!("[{}] Skipping chapter without a name on {}", self.name, series_url);
                continue;
            };
            let name = html::clean_chapter_name(&raw_name);

            let is_premium = selectors
                .premium_status
                .as_ref()
                .map(|target| html::select_first(container, target).is_some())
                .unwrap_or(false);

            let href = html::extract_link(container, &selectors.url);
            let paid = selectors.no_premium_chapter_url.as_ref().filter(|_| is_premium);

            let (url, no_public_url) = match (paid, href) {
                (Some(paid), _) => match self.paid_chapter_url(container, paid, &name, index, series_url) {
                    Some(url) => (url, true),
                    None => continue,
                },
                (None, Some(href)) => (self.chapter_link(&href), false),
                (None, None) => {
                    log::debug!("[{}] Skipping '{}' without a link on {}", self.name, name, series_url);
                    continue;
                }
            };

            chapters.push(Chapter {
                name,
                url,
                index,
                is_premium,
                no_public_url,
            });
        }
        chapters
    }

    /// Link for a paid chapter, built from the number in its label (or its
    /// position when the label has none).
    fn paid_chapter_url(
        &self,
        container: ElementRef<'_>,
        paid: &PaidChapterUrl,
        name: &str,
        index: u32,
        series_url: &str,
    ) -> Option<String> {
        let source_text = match &paid.string_selector {
            Some(target) => html::extract_value(container, target).unwrap_or_else(|| name.to_string()),
            None => name.to_string(),
        };
        let number = match &paid.regex {
            Some(rx) => rx
                .captures(&source_text)
                .and_then(|c| c.name("n"))
                .map(|m| m.as_str().to_string()),
            None => helpers::chapter_number(&source_text),
        }
        .unwrap_or_else(|| (index + 1).to_string());

        let url_name = self.url_name(series_url);
        if paid.url_fmt.contains("{url_name}") && url_name.is_none() {
            log::warn!("[{}] No url name in {} for paid chapter '{}'", self.name, series_url, name);
            return None;
        }
        let id = if self.site.properties.dynamic_url {
            Some(ID_PLACEHOLDER.to_string())
        } else {
            self.capture(series_url, "id")
        };
        Some(
            paid.url_fmt
                .replace("{base_url}", self.site.base_url())
                .replace("{url_name}", url_name.as_deref().unwrap_or(""))
                .replace("{id}", id.as_deref().unwrap_or(""))
                .replace("{n}", &number),
        )
    }

    // ---- listings ----

    /// Series entries of a front page or search result page. Entries whose
    /// link or title cannot be read are skipped.
    pub fn extract_listing(&self, markup: &str, listing: &ListingSelectors) -> Vec<PartialSeries> {
        let document = html::parse_document(markup, &self.site.selectors.unwanted_tags);
        let base = self.site.base_url();
        let mut found = Vec::new();

        for item in html::select_all(document.root_element(), &listing.container) {
            let Some(href) = html::extract_link(item, &listing.url) else {
                continue;
            };
            let url = html::absolutize(base, &href);
            let Some(title) = html::extract_value(item, &listing.title) else {
                continue;
            };
            let Ok(id) = self.manga_id(&url) else {
                log::debug!("[{}] Listing entry {} does not match the url pattern", self.name, url);
                continue;
            };
            let cover_url = listing
                .cover
                .as_ref()
                .and_then(|target| html::select_first(item, target))
                .and_then(|element| html::extract_cover_link(element, base));
            let latest_chapters = listing
                .chapters
                .as_ref()
                .map(|selectors| self.chapters_in(item, selectors, &url))
                .unwrap_or_default();

            found.push(PartialSeries {
                key: SeriesKey::new(&self.name, id),
                title,
                url,
                cover_url,
                latest_chapters,
            });
        }
        found
    }

    pub async fn front_page(&self) -> Result<Vec<PartialSeries>, ScanError> {
        let Some(listing) = &self.site.selectors.front_page else {
            return Err(ScanError::Unsupported {
                source_name: self.name.clone(),
                capability: "front page",
            });
        };
        let Some(url) = &self.site.properties.latest_updates_url else {
            return Err(ScanError::configuration(&self.name, "front page has no latest_updates_url"));
        };
        let markup = self.get_text(self.request(url).fresh()).await?;
        let mut partials = self.extract_listing(&markup, listing);

        if self.site.properties.dynamic_url {
            self.learn_ids(&partials);
            for partial in &mut partials {
                self.unload_partial(partial);
            }
        }
        log::debug!("[{}] Found {} series on the front page", self.name, partials.len());
        Ok(partials)
    }

    pub fn search_request(&self, query: &str) -> Result<FetchRequest, ScanError> {
        let Some(search) = &self.site.search else {
            return Err(ScanError::Unsupported {
                source_name: self.name.clone(),
                capability: "search",
            });
        };

        let query = match search.query_parsing.encoding {
            Some(QueryEncoding::Url) => urlencoding::encode(query).into_owned(),
            Some(QueryEncoding::Raw) => query.to_string(),
            None => search
                .query_parsing
                .regex
                .iter()
                .fold(query.to_string(), |q, rule| {
                    rule.pattern.replace_all(&q, rule.sub_value.as_str()).into_owned()
                }),
        };

        let mut values: BTreeMap<String, String> = BTreeMap::new();
        let mut flags: Vec<String> = Vec::new();
        for (key, value) in &search.extra_params {
            match value {
                serde_json::Value::Null => flags.push(key.clone()),
                serde_json::Value::String(s) => {
                    values.insert(key.clone(), s.clone());
                }
                other => {
                    values.insert(key.clone(), other.to_string());
                }
            }
        }

        let param = search.search_param_name.clone().unwrap_or_default();
        let request = match search.as_type {
            SearchPlacement::Path => {
                let mut pairs: Vec<String> = values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                pairs.extend(flags);
                let suffix = if pairs.is_empty() {
                    String::new()
                } else {
                    format!("?{}", pairs.join("&"))
                };
                self.request(&format!("{}{}{}", search.url, query, suffix))
                    .with_method(search.request_method)
            }
            SearchPlacement::Data => {
                let mut form = values;
                for flag in flags {
                    form.insert(flag, String::new());
                }
                form.insert(param, query);
                self.request(&search.url).with_form(form)
            }
            SearchPlacement::Param => {
                let mut params = values;
                for flag in flags {
                    params.insert(flag, String::new());
                }
                params.insert(param, query);
                self.request(&search.url)
                    .with_method(search.request_method)
                    .with_params(params)
            }
        };
        Ok(request)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<PartialSeries>, ScanError> {
        let request = self.search_request(query)?;
        let Some(listing) = &self.site.selectors.search else {
            return Err(ScanError::Unsupported {
                source_name: self.name.clone(),
                capability: "search",
            });
        };
        let markup = self.get_text(request).await?;
        let mut partials = self.extract_listing(&markup, listing);
        for partial in &mut partials {
            self.unload_partial(partial);
        }
        Ok(partials)
    }
}

/// Adapter driven entirely by its descriptor.
pub struct BasicScanlator {
    context: SiteContext,
}

impl BasicScanlator {
    pub fn new(name: impl Into<String>, site: SiteDescriptor, fetcher: Arc<Fetcher>) -> Self {
        Self {
            context: SiteContext::new(name, site, fetcher),
        }
    }
}

impl Scanlator for BasicScanlator {
    fn context(&self) -> &SiteContext {
        &self.context
    }
}
