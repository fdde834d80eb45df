use crate::descriptor::SiteDescriptor;
use crate::error::ScanError;
use crate::helpers;
use crate::models::{Chapter, SeriesStatus};
use crate::request::Fetcher;
use crate::scanlators::{Scanlator, SiteContext};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};

#[derive(Deserialize, Debug)]
struct NextData {
    props: NextProps,
}

#[derive(Deserialize, Debug)]
struct NextProps {
    #[serde(rename = "pageProps")]
    page_props: PageProps,
}

#[derive(Deserialize, Debug)]
struct PageProps {
    #[serde(default)]
    series: Option<SeriesData>,
    #[serde(default)]
    chapters: Option<Vec<ChapterData>>,
}

#[derive(Deserialize, Debug)]
struct SeriesData {
    series_id: u64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChapterData {
    series_id: u64,
    chapter: String,
    token: String,
}

fn next_data_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<script id="__NEXT_DATA__" type="application/json">(.+?)</script>"#).ok()
    })
    .as_ref()
}

fn extract_next_data(markup: &str) -> Option<NextData> {
    let json = next_data_regex()?.captures(markup)?.get(1)?.as_str();
    match serde_json::from_str(json) {
        Ok(data) => Some(data),
        Err(e) => {
            log::warn!("[flamecomics] __NEXT_DATA__ did not parse: {}", e);
            None
        }
    }
}

struct RawPatterns {
    token: Regex,
    chapter: Regex,
    series_id: Regex,
}

fn raw_patterns() -> Option<&'static RawPatterns> {
    static RE: OnceLock<Option<RawPatterns>> = OnceLock::new();
    RE.get_or_init(|| {
        Some(RawPatterns {
            token: Regex::new(r#""token":"(?P<id>[a-z\d]+)""#).ok()?,
            chapter: Regex::new(r#""chapter":"(?P<num>(?:\d*[.])?\d+)""#).ok()?,
            series_id: Regex::new(r#""series_id":(?P<id>\d+)"#).ok()?,
        })
    })
    .as_ref()
}

/// "287.00" becomes "Chapter 287".
fn chapter_name(number: &str) -> String {
    let trimmed = if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    };
    format!("Chapter {}", trimmed)
}

/// Flame Comics is a Next.js app: the chapter list only exists as JSON
/// embedded in the series page, newest first.
pub struct FlameComics {
    context: SiteContext,
}

impl FlameComics {
    pub fn new(name: &str, site: SiteDescriptor, fetcher: Arc<Fetcher>) -> Self {
        Self {
            context: SiteContext::new(name, site, fetcher),
        }
    }

    fn chapter_url(&self, series_id: &str, token: &str) -> String {
        format!("{}/series/{}/{}", self.context.site.base_url(), series_id, token)
    }

    fn chapters_from_next_data(&self, data: NextData) -> Option<Vec<Chapter>> {
        let chapters = data.props.page_props.chapters?;
        Some(
            chapters
                .iter()
                .rev()
                .enumerate()
                .map(|(i, c)| {
                    Chapter::new(
                        chapter_name(&c.chapter),
                        self.chapter_url(&c.series_id.to_string(), &c.token),
                        i as u32,
                    )
                })
                .collect(),
        )
    }

    /// Pairs "chapter" and "token" fields in document order when the page
    /// carries the data outside of `__NEXT_DATA__`.
    fn chapters_from_raw(&self, markup: &str, series_url: &str) -> Result<Vec<Chapter>, ScanError> {
        let patterns = raw_patterns()
            .ok_or_else(|| ScanError::parse(&self.context.name, series_url, "chapter patterns"))?;
        let series_id = patterns
            .series_id
            .captures(markup)
            .and_then(|c| c.name("id"))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ScanError::parse(&self.context.name, series_url, "series id"))?;

        let pairs: Vec<(String, String)> = patterns
            .chapter
            .captures_iter(markup)
            .filter_map(|c| c.name("num").map(|m| m.as_str().to_string()))
            .zip(
                patterns
                    .token
                    .captures_iter(markup)
                    .filter_map(|c| c.name("id").map(|m| m.as_str().to_string())),
            )
            .collect();

        Ok(pairs
            .iter()
            .rev()
            .enumerate()
            .map(|(i, (number, token))| {
                Chapter::new(chapter_name(number), self.chapter_url(&series_id, token), i as u32)
            })
            .collect())
    }
}

impl Scanlator for FlameComics {
    fn context(&self) -> &SiteContext {
        &self.context
    }

    fn get_chapters(&self, markup: &str, series_url: &str) -> Result<Vec<Chapter>, ScanError> {
        if let Some(chapters) = extract_next_data(markup).and_then(|d| self.chapters_from_next_data(d)) {
            log::debug!("[{}] {} chapters in __NEXT_DATA__", self.context.name, chapters.len());
            return Ok(chapters);
        }
        self.chapters_from_raw(markup, series_url)
    }

    fn get_status(&self, markup: &str) -> SeriesStatus {
        let from_json = extract_next_data(markup)
            .and_then(|d| d.props.page_props.series)
            .and_then(|s| s.status)
            .map(|text| helpers::parse_status(&text))
            .filter(|s| *s != SeriesStatus::Unknown);
        from_json.unwrap_or_else(|| self.context.extract_status(markup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_name_trims_decimals() {
        assert_eq!(chapter_name("287.00"), "Chapter 287");
        assert_eq!(chapter_name("12.50"), "Chapter 12.5");
        assert_eq!(chapter_name("7"), "Chapter 7");
    }

    #[test]
    fn test_extract_next_data() {
        let markup = r#"<html><script id="__NEXT_DATA__" type="application/json">{"props":{"pageProps":{"series":{"series_id":2,"status":"Ongoing"},"chapters":[{"series_id":2,"chapter":"2.00","token":"b2"},{"series_id":2,"chapter":"1.00","token":"a1"}]}}}</script></html>"#;
        let data = extract_next_data(markup).unwrap();
        assert_eq!(data.props.page_props.series.unwrap().series_id, 2);
        assert_eq!(data.props.page_props.chapters.unwrap().len(), 2);
    }
}
