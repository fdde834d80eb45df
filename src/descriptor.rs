//! Declarative site descriptors.
//!
//! A descriptor file is one JSON document with a `"static"` map (sources
//! handled entirely by the generic adapter) and a `"custom"` map (sources
//! whose adapter overrides some extraction steps). Both maps share the same
//! schema. Every entry is deserialized and validated on its own so a broken
//! entry is reported with its source name.

use crate::error::ScanError;
use crate::request::HttpMethod;
use regex::Regex;
use reqwest::Url;
use scraper::Selector;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Reserved selector meaning "the enclosing container element itself".
pub const CONTAINER_TOKEN: &str = "_container_";

/// Placeholder dynamic-URL sites store in place of the rotating id.
pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "direct", alias = "http")]
    Direct,
    #[serde(rename = "emulated", alias = "curl")]
    Emulated,
    #[serde(rename = "proxy", alias = "flare")]
    ProxyRouted,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Direct => "direct",
            RequestKind::Emulated => "emulated",
            RequestKind::ProxyRouted => "proxy",
        }
    }
}

/// Where a value is read from, relative to the element being scraped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorTarget {
    Container,
    Css(String),
}

impl SelectorTarget {
    pub fn css(&self) -> Option<&str> {
        match self {
            SelectorTarget::Container => None,
            SelectorTarget::Css(css) => Some(css),
        }
    }

    /// `a[href]` style selectors (a trailing attribute test without `=`) read
    /// the attribute instead of the element text.
    pub fn attribute(&self) -> Option<&str> {
        let css = self.css()?;
        attribute_of(css)
    }
}

pub(crate) fn attribute_of(css: &str) -> Option<&str> {
    if !css.ends_with(']') {
        return None;
    }
    let open = css.rfind('[')?;
    let name = &css[open + 1..css.len() - 1];
    if name.contains('=') || name.is_empty() {
        return None;
    }
    Some(name.trim())
}

impl From<String> for SelectorTarget {
    fn from(value: String) -> Self {
        if value == CONTAINER_TOKEN {
            SelectorTarget::Container
        } else {
            SelectorTarget::Css(value)
        }
    }
}

impl<'de> Deserialize<'de> for SelectorTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SelectorTarget::from)
    }
}

mod regex_serde {
    use regex::Regex;
    use serde::{Deserialize, Deserializer};

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Regex, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern).map_err(serde::de::Error::custom)
    }

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Regex>, D::Error> {
        let pattern = Option::<String>::deserialize(deserializer)?;
        pattern
            .map(|p| Regex::new(&p))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteDescriptor {
    pub request_method: RequestKind,
    #[serde(deserialize_with = "regex_serde::required")]
    pub url_regex: Regex,
    /// Chapters live behind a separate endpoint fetched with this method.
    #[serde(default)]
    pub chapter_ajax: Option<HttpMethod>,
    #[serde(default)]
    pub check_interval_mins: Option<u64>,
    pub properties: SiteProperties,
    pub selectors: SiteSelectors,
    #[serde(default)]
    pub search: Option<SearchSpec>,
    #[serde(default)]
    pub custom_headers: Option<CustomHeaders>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteProperties {
    pub base_url: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub format_urls: FormatUrls,
    #[serde(default)]
    pub latest_updates_url: Option<String>,
    #[serde(default)]
    pub dynamic_url: bool,
    #[serde(default = "default_time_formats")]
    pub time_formats: Vec<String>,
    #[serde(default)]
    pub no_status: bool,
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    #[serde(default)]
    pub missing_id_connector: Option<MissingIdConnector>,
    #[serde(default)]
    pub url_chapter_prefix: Option<String>,
    #[serde(default, deserialize_with = "regex_serde::optional")]
    pub chapter_regex: Option<Regex>,
    #[serde(default)]
    pub chapter_order: ChapterOrder,
}

fn default_time_formats() -> Vec<String> {
    vec![
        "%b %d, %Y".to_string(),
        "%B %d, %Y".to_string(),
        "%d/%m/%Y".to_string(),
        "%d-%m-%Y".to_string(),
    ]
}

fn default_stale_after_days() -> i64 { 60 }

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatUrls {
    /// Series page template, filled with `{url_name}` and `{id}`.
    pub manga: String,
    #[serde(default)]
    pub ajax: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MissingIdConnector {
    #[serde(rename = "char")]
    pub connector: String,
    /// The id sits before the slug (`{id}-slug`) rather than after it.
    #[serde(default)]
    pub before_id: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteSelectors {
    pub title: Vec<SelectorTarget>,
    #[serde(default)]
    pub synopsis: Option<SelectorTarget>,
    #[serde(default)]
    pub cover: Vec<SelectorTarget>,
    #[serde(default)]
    pub status: Vec<SelectorTarget>,
    #[serde(default)]
    pub unwanted_tags: Vec<String>,
    pub chapters: ChapterSelectors,
    #[serde(default)]
    pub front_page: Option<ListingSelectors>,
    #[serde(default)]
    pub search: Option<ListingSelectors>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterSelectors {
    pub container: String,
    pub name: SelectorTarget,
    pub url: SelectorTarget,
    /// Matches inside the chapter container only when the chapter is paid.
    #[serde(default)]
    pub premium_status: Option<SelectorTarget>,
    #[serde(default)]
    pub no_premium_chapter_url: Option<PaidChapterUrl>,
}

/// How to build a link for a paid chapter the site shows without one.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaidChapterUrl {
    /// Where to read the text the chapter number is taken from; the chapter
    /// name when absent.
    #[serde(default)]
    pub string_selector: Option<SelectorTarget>,
    /// Must capture a group named `n`.
    #[serde(default, deserialize_with = "regex_serde::optional")]
    pub regex: Option<Regex>,
    /// Template with `{base_url}`, `{url_name}`, `{id}` and `{n}`.
    pub url_fmt: String,
}

/// Selectors for a page listing many series (front page, search results).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingSelectors {
    pub container: String,
    pub title: SelectorTarget,
    pub url: SelectorTarget,
    #[serde(default)]
    pub cover: Option<SelectorTarget>,
    #[serde(default)]
    pub chapters: Option<ChapterSelectors>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPlacement {
    #[default]
    Param,
    Path,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryEncoding {
    Url,
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRewrite {
    #[serde(deserialize_with = "regex_serde::required")]
    pub pattern: Regex,
    pub sub_value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryParsing {
    /// `None` applies the rewrite rules instead of an encoding.
    #[serde(default)]
    pub encoding: Option<QueryEncoding>,
    #[serde(default)]
    pub regex: Vec<QueryRewrite>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchSpec {
    pub url: String,
    #[serde(default)]
    pub search_param_name: Option<String>,
    /// `null` values are sent as bare flags.
    #[serde(default)]
    pub extra_params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub as_type: SearchPlacement,
    #[serde(default)]
    pub query_parsing: QueryParsing,
    #[serde(default)]
    pub request_method: HttpMethod,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomHeaders {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: Vec<CookieSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
}

impl SiteDescriptor {
    /// Headers sent with every request to this site, cookies folded into a
    /// single `Cookie` header.
    pub fn request_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(custom) = &self.custom_headers {
            headers.extend(custom.headers.clone());
            if !custom.cookies.is_empty() {
                let cookie = custom
                    .cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers.insert("Cookie".to_string(), cookie);
            }
        }
        headers
    }

    pub fn supports_front_page(&self) -> bool {
        self.selectors.front_page.is_some()
    }

    pub fn supports_search(&self) -> bool {
        self.search.is_some() && self.selectors.search.is_some()
    }

    pub fn base_url(&self) -> &str {
        self.properties.base_url.trim_end_matches('/')
    }

    pub fn validate(&self, name: &str) -> Result<(), ScanError> {
        let fail = |detail: String| Err(ScanError::configuration(name, detail));

        if Url::parse(&self.properties.base_url).is_err() {
            return fail(format!("base_url '{}' is not a valid URL", self.properties.base_url));
        }
        if !self.url_regex.capture_names().flatten().any(|g| g == "url_name") {
            return fail("url_regex must capture a group named `url_name`".to_string());
        }
        if self.selectors.title.is_empty() {
            return fail("selectors.title must list at least one selector".to_string());
        }
        if self.properties.dynamic_url {
            if self.properties.chapter_regex.is_none() {
                return fail("dynamic_url sites require properties.chapter_regex".to_string());
            }
            if self.properties.missing_id_connector.is_none() {
                return fail("dynamic_url sites require properties.missing_id_connector".to_string());
            }
        }
        if self.selectors.front_page.is_some() && self.properties.latest_updates_url.is_none() {
            return fail("selectors.front_page requires properties.latest_updates_url".to_string());
        }
        if self.chapter_ajax.is_some() && self.properties.format_urls.ajax.is_none() {
            return fail("chapter_ajax requires properties.format_urls.ajax".to_string());
        }
        if let Some(search) = &self.search {
            if self.selectors.search.is_none() {
                return fail("search is configured but selectors.search is missing".to_string());
            }
            if search.as_type != SearchPlacement::Path && search.search_param_name.is_none() {
                return fail("search.search_param_name is required unless as_type is `path`".to_string());
            }
        }
        if let Some(paid) = &self.selectors.chapters.no_premium_chapter_url {
            if !paid.url_fmt.contains("{n}") {
                return fail("no_premium_chapter_url.url_fmt must contain `{n}`".to_string());
            }
            if let Some(re) = &paid.regex {
                if !re.capture_names().flatten().any(|g| g == "n") {
                    return fail("no_premium_chapter_url.regex must capture a group named `n`".to_string());
                }
            }
        }

        for css in self.all_css() {
            if let Err(e) = Selector::parse(css) {
                return fail(format!("invalid selector '{}': {}", css, e));
            }
        }
        Ok(())
    }

    fn all_css(&self) -> Vec<&str> {
        let s = &self.selectors;
        let mut out: Vec<&str> = Vec::new();
        out.extend(s.title.iter().filter_map(SelectorTarget::css));
        out.extend(s.synopsis.iter().filter_map(SelectorTarget::css));
        out.extend(s.cover.iter().filter_map(SelectorTarget::css));
        out.extend(s.status.iter().filter_map(SelectorTarget::css));
        out.extend(s.unwanted_tags.iter().map(String::as_str));
        collect_chapter_css(&s.chapters, &mut out);
        for listing in s.front_page.iter().chain(s.search.iter()) {
            out.push(&listing.container);
            out.extend(listing.title.css());
            out.extend(listing.url.css());
            out.extend(listing.cover.iter().filter_map(SelectorTarget::css));
            if let Some(chapters) = &listing.chapters {
                collect_chapter_css(chapters, &mut out);
            }
        }
        out
    }
}

fn collect_chapter_css<'a>(chapters: &'a ChapterSelectors, out: &mut Vec<&'a str>) {
    out.push(&chapters.container);
    out.extend(chapters.name.css());
    out.extend(chapters.url.css());
    out.extend(chapters.premium_status.iter().filter_map(SelectorTarget::css));
    if let Some(paid) = &chapters.no_premium_chapter_url {
        out.extend(paid.string_selector.iter().filter_map(SelectorTarget::css));
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptorFile {
    #[serde(default, rename = "static")]
    basic: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    custom: BTreeMap<String, serde_json::Value>,
}

/// All descriptors loaded from one file, keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    pub basic: BTreeMap<String, SiteDescriptor>,
    pub custom: BTreeMap<String, SiteDescriptor>,
}

impl DescriptorSet {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::configuration(path.display().to_string(), format!("cannot read descriptor file: {}", e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ScanError> {
        let raw: RawDescriptorFile = serde_json::from_str(content)
            .map_err(|e| ScanError::configuration("<descriptor file>", e.to_string()))?;

        let mut set = DescriptorSet::default();
        for (name, value) in raw.basic {
            let descriptor = parse_entry(&name, value)?;
            set.basic.insert(name, descriptor);
        }
        for (name, value) in raw.custom {
            if set.basic.contains_key(&name) {
                return Err(ScanError::configuration(
                    &name,
                    "declared in both `static` and `custom`",
                ));
            }
            let descriptor = parse_entry(&name, value)?;
            set.custom.insert(name, descriptor);
        }

        log::info!(
            "Loaded {} static and {} custom site descriptors",
            set.basic.len(),
            set.custom.len()
        );
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.basic.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_entry(name: &str, value: serde_json::Value) -> Result<SiteDescriptor, ScanError> {
    let descriptor: SiteDescriptor =
        serde_json::from_value(value).map_err(|e| ScanError::configuration(name, e.to_string()))?;
    descriptor.validate(name)?;
    Ok(descriptor)
}
