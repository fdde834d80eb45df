//! Scripted site and fixture builders shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_manga_tracker::descriptor::{DescriptorSet, RequestKind};
use rust_manga_tracker::error::ScanError;
use rust_manga_tracker::models::{Chapter, PartialSeries, Series, SeriesKey, SeriesStatus};
use rust_manga_tracker::registry::ScanlatorRegistry;
use rust_manga_tracker::request::{FetchRequest, FetchResponse, Fetcher, RequestStrategy};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub enum Reply {
    Page(u16, String),
    Timeout,
}

/// Answers requests from a URL-keyed table; anything not routed is a 404.
#[derive(Default)]
pub struct StubSite {
    routes: Mutex<HashMap<String, Reply>>,
    hits: Mutex<Vec<String>>,
    latency: Duration,
}

impl StubSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn page(&self, url: &str, body: impl Into<String>) {
        self.reply(url, Reply::Page(200, body.into()));
    }

    pub fn status(&self, url: &str, status: u16) {
        self.reply(url, Reply::Page(status, format!("status {}", status)));
    }

    pub fn timeout(&self, url: &str) {
        self.reply(url, Reply::Timeout);
    }

    fn reply(&self, url: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

#[async_trait]
impl RequestStrategy for StubSite {
    fn kind(&self) -> RequestKind {
        RequestKind::Direct
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ScanError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.hits.lock().unwrap().push(request.url.clone());
        let reply = self.routes.lock().unwrap().get(&request.url).cloned();
        match reply {
            Some(Reply::Page(status, body)) => Ok(FetchResponse {
                status,
                body,
                url: request.url.clone(),
            }),
            Some(Reply::Timeout) => Err(ScanError::Fetch {
                url: request.url.clone(),
                status: None,
                timed_out: true,
                message: "operation timed out".to_string(),
            }),
            None => Ok(FetchResponse {
                status: 404,
                body: "not found".to_string(),
                url: request.url.clone(),
            }),
        }
    }
}

/// Descriptor of a plain site at `https://{host}` with a front page.
pub fn toonsite(host: &str) -> serde_json::Value {
    let escaped = host.replace('.', r"\.");
    json!({
        "request_method": "http",
        "url_regex": format!(r"https?://{}/series/(?P<url_name>[\w-]+)/?", escaped),
        "properties": {
            "base_url": format!("https://{}", host),
            "format_urls": { "manga": format!("https://{}/series/{{url_name}}", host) },
            "latest_updates_url": format!("https://{}/latest", host)
        },
        "selectors": {
            "title": ["h1"],
            "status": ["div.status"],
            "chapters": { "container": "ul.chapters li", "name": "a", "url": "a[href]" },
            "front_page": {
                "container": "div.item",
                "title": "h3",
                "url": "a.series[href]",
                "chapters": { "container": "li", "name": "a", "url": "a[href]" }
            }
        }
    })
}

pub fn descriptor_file(entries: &[(&str, serde_json::Value)]) -> DescriptorSet {
    let mut basic = serde_json::Map::new();
    for (name, entry) in entries {
        basic.insert(name.to_string(), entry.clone());
    }
    DescriptorSet::from_json(&json!({ "static": basic }).to_string()).unwrap()
}

pub fn registry(set: &DescriptorSet, site: Arc<StubSite>) -> ScanlatorRegistry {
    let fetcher = Fetcher::new(Duration::ZERO).with_strategy(site);
    ScanlatorRegistry::from_descriptors(set, Arc::new(fetcher)).unwrap()
}

pub fn chapter_url(host: &str, slug: &str, n: u32) -> String {
    format!("https://{}/series/{}/chapter-{}", host, slug, n)
}

pub fn series_url(host: &str, slug: &str) -> String {
    format!("https://{}/series/{}", host, slug)
}

/// Series page listing `chapters` newest first, the way most sites do.
pub fn series_page(host: &str, slug: &str, title: &str, status: &str, chapters: &[u32]) -> String {
    let items: String = chapters
        .iter()
        .rev()
        .map(|n| {
            format!(
                r#"<li><a href="{}">Chapter {}</a><span>2 days ago</span></li>"#,
                chapter_url(host, slug, *n),
                n
            )
        })
        .collect();
    format!(
        r#"<html><body><h1>{}</h1><div class="status">{}</div><ul class="chapters">{}</ul></body></html>"#,
        title, status, items
    )
}

/// Front page with one entry per `(slug, title, latest chapters)`.
pub fn front_page(host: &str, entries: &[(&str, &str, &[u32])]) -> String {
    let items: String = entries
        .iter()
        .map(|(slug, title, chapters)| {
            let latest: String = chapters
                .iter()
                .rev()
                .map(|n| format!(r#"<li><a href="{}">Chapter {}</a></li>"#, chapter_url(host, slug, *n), n))
                .collect();
            format!(
                r#"<div class="item"><a class="series" href="{}"><h3>{}</h3></a><ul>{}</ul></div>"#,
                series_url(host, slug),
                title,
                latest
            )
        })
        .collect();
    format!("<html><body>{}</body></html>", items)
}

/// Stored series with chapters `1..=count` of `slug` on `source`.
pub fn stored_series(source: &str, host: &str, slug: &str, chapters: &[u32]) -> Series {
    let mut series = PartialSeries {
        key: SeriesKey::new(source, slug),
        title: slug.to_uppercase(),
        url: series_url(host, slug),
        cover_url: None,
        latest_chapters: chapters
            .iter()
            .enumerate()
            .map(|(i, n)| Chapter::new(format!("Chapter {}", n), chapter_url(host, slug, *n), i as u32))
            .collect(),
    }
    .into_series();
    series.status = SeriesStatus::Ongoing;
    series.has_front_page_entry = true;
    series
}
