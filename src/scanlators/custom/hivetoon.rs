use crate::descriptor::SiteDescriptor;
use crate::error::ScanError;
use crate::models::{Chapter, PartialSeries, SeriesKey};
use crate::request::Fetcher;
use crate::scanlators::{Scanlator, SiteContext};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

const CHAPTERS_PATH: &str = "/api/chapters";
const PAGE_SIZE: usize = 50;
// bounds the pagination if the API keeps reporting a larger total
const MAX_PAGES: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    post_title: String,
    slug: String,
    #[serde(default)]
    featured_image: Option<String>,
    #[serde(default)]
    chapters: Vec<PostChapter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostChapter {
    slug: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    number: serde_json::Value,
    #[serde(default)]
    is_locked: Option<bool>,
}

impl PostChapter {
    fn display_name(&self) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        match &self.number {
            serde_json::Value::String(s) => format!("Chapter {}", s),
            serde_json::Value::Null => format!("Chapter {}", self.slug),
            other => format!("Chapter {}", other),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterPage {
    post: ChapterPagePost,
    #[serde(default)]
    total_chapter_count: usize,
}

#[derive(Debug, Deserialize)]
struct ChapterPagePost {
    #[serde(default)]
    chapters: Vec<PostChapter>,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    posts: Vec<Post>,
}

fn post_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\\?"postId\\?":(\d+)"#).ok())
        .as_ref()
}

/// The posts array embedded in the front page, escaped or not.
fn embedded_posts(markup: &str) -> Option<Vec<Post>> {
    let unescaped = markup.replace(r#"\""#, "\"");
    let key = "\"initalPosts\":";
    let start = unescaped.find(key)? + key.len();
    let mut stream = serde_json::Deserializer::from_str(&unescaped[start..]).into_iter::<Vec<Post>>();
    match stream.next()? {
        Ok(posts) => Some(posts),
        Err(e) => {
            log::warn!("[hivetoon] Embedded posts did not parse: {}", e);
            None
        }
    }
}

fn append_chapters(out: &mut Vec<Chapter>, page: Vec<PostChapter>, series_url: &str) {
    let base = series_url.trim_end_matches('/');
    for chapter in page {
        let index = out.len() as u32;
        out.push(
            Chapter::new(chapter.display_name(), format!("{}/{}", base, chapter.slug), index)
                .premium(chapter.is_locked == Some(true)),
        );
    }
}

/// Hivetoon renders with a JSON API behind it: listings come from post
/// objects and the chapter list is paged through `/api/chapters`.
pub struct Hivetoon {
    context: SiteContext,
}

impl Hivetoon {
    pub fn new(name: &str, site: SiteDescriptor, fetcher: Arc<Fetcher>) -> Self {
        Self {
            context: SiteContext::new(name, site, fetcher),
        }
    }

    fn partials_from_posts(&self, posts: Vec<Post>) -> Vec<PartialSeries> {
        let template = &self.context.site.properties.format_urls.manga;
        posts
            .into_iter()
            .map(|post| {
                let url = template.replace("{url_name}", &post.slug);
                let latest_chapters = post
                    .chapters
                    .iter()
                    .rev()
                    .enumerate()
                    .map(|(i, c)| {
                        Chapter::new(
                            c.display_name(),
                            format!("{}/{}", url.trim_end_matches('/'), c.slug),
                            i as u32,
                        )
                        .premium(c.is_locked == Some(true))
                    })
                    .collect();
                PartialSeries {
                    key: SeriesKey::new(&self.context.name, &post.slug),
                    title: post.post_title,
                    url,
                    cover_url: post.featured_image,
                    latest_chapters,
                }
            })
            .collect()
    }

    fn post_id(&self, markup: &str, series_url: &str) -> Result<String, ScanError> {
        post_id_regex()
            .and_then(|re| re.captures(markup))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ScanError::parse(&self.context.name, series_url, "post id"))
    }

    async fn chapter_page(&self, post_id: &str, skip: usize) -> Result<ChapterPage, ScanError> {
        let url = format!("{}{}", self.context.site.base_url(), CHAPTERS_PATH);
        let mut params = BTreeMap::new();
        params.insert("postId".to_string(), post_id.to_string());
        params.insert("skip".to_string(), skip.to_string());
        params.insert("take".to_string(), PAGE_SIZE.to_string());
        params.insert("order".to_string(), "asc".to_string());

        let body = self
            .context
            .get_text(self.context.request(&url).with_params(params))
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| ScanError::parse(&self.context.name, &url, format!("chapter page: {}", e)))
    }
}

#[async_trait]
impl Scanlator for Hivetoon {
    fn context(&self) -> &SiteContext {
        &self.context
    }

    async fn fetch_chapters(&self, series_url: &str, markup: &str) -> Result<Vec<Chapter>, ScanError> {
        let post_id = self.post_id(markup, series_url)?;
        let mut chapters: Vec<Chapter> = Vec::new();

        for page in 0..MAX_PAGES {
            let skip = page * PAGE_SIZE;
            let reply = self.chapter_page(&post_id, skip).await?;
            let received = reply.post.chapters.len();
            append_chapters(&mut chapters, reply.post.chapters, series_url);
            if received == 0 || skip + received >= reply.total_chapter_count {
                break;
            }
        }

        log::debug!(
            "[{}] {} chapters for post {}",
            self.context.name,
            chapters.len(),
            post_id
        );
        Ok(chapters)
    }

    /// Chapters of one chapters-API page body.
    fn get_chapters(&self, markup: &str, series_url: &str) -> Result<Vec<Chapter>, ScanError> {
        let page: ChapterPage = serde_json::from_str(markup)
            .map_err(|e| ScanError::parse(&self.context.name, series_url, format!("chapter page: {}", e)))?;
        let mut chapters = Vec::new();
        append_chapters(&mut chapters, page.post.chapters, series_url);
        Ok(chapters)
    }

    async fn get_front_page(&self) -> Result<Vec<PartialSeries>, ScanError> {
        let Some(url) = &self.context.site.properties.latest_updates_url else {
            return Err(ScanError::Unsupported {
                source_name: self.context.name.clone(),
                capability: "front page",
            });
        };
        let markup = self.context.get_text(self.context.request(url).fresh()).await?;
        let posts = embedded_posts(&markup)
            .ok_or_else(|| ScanError::parse(&self.context.name, url, "front page posts"))?;
        Ok(self.partials_from_posts(posts))
    }

    fn supports_front_page(&self) -> bool {
        self.context.site.properties.latest_updates_url.is_some()
    }

    async fn search(&self, query: &str) -> Result<Vec<PartialSeries>, ScanError> {
        let request = self.context.search_request(query)?;
        let url = request.url.clone();
        let body = self.context.get_text(request).await?;
        let reply: SearchReply = serde_json::from_str(&body)
            .map_err(|e| ScanError::parse(&self.context.name, &url, format!("search reply: {}", e)))?;
        Ok(self.partials_from_posts(reply.posts))
    }

    fn supports_search(&self) -> bool {
        self.context.site.search.is_some()
    }
}
