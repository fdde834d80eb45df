mod common;

use common::{descriptor_file, registry, toonsite, StubSite};
use rust_manga_tracker::request::HttpMethod;
use rust_manga_tracker::scanlators::Scanlator;
use serde_json::json;
use std::sync::Arc;

const HOST: &str = "toonsite.example";

fn single(name: &str, entry: serde_json::Value, site: Arc<StubSite>) -> Arc<dyn Scanlator> {
    let set = descriptor_file(&[(name, entry)]);
    registry(&set, site).get(name).unwrap()
}

fn paid_site() -> serde_json::Value {
    let mut entry = toonsite(HOST);
    entry["selectors"]["chapters"] = json!({
        "container": "ul.chapters li",
        "name": "span.name",
        "url": "a[href]",
        "premium_status": "i.lock",
        "no_premium_chapter_url": { "url_fmt": "{base_url}/series/{url_name}/chapter-{n}" }
    });
    entry
}

#[test]
fn test_paid_chapter_without_link_gets_synthesized_url() {
    let scanlator = single("toonsite", paid_site(), StubSite::new());
    let markup = r#"
        <ul class="chapters">
          <li><span class="name">Chapter 6</span><i class="lock"></i></li>
          <li><a href="/series/solo/chapter-5"><span class="name">Chapter 5</span></a></li>
        </ul>"#;

    let chapters = scanlator
        .get_chapters(markup, "https://toonsite.example/series/solo")
        .unwrap();

    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].url, "https://toonsite.example/series/solo/chapter-5");
    assert!(!chapters[0].is_premium);
    let paid = &chapters[1];
    assert_eq!(paid.url, "https://toonsite.example/series/solo/chapter-6");
    assert_eq!(paid.index, 1);
    assert!(paid.is_premium);
    assert!(paid.no_public_url);
}

#[test]
fn test_container_token_reads_the_container_link() {
    let mut entry = toonsite(HOST);
    entry["selectors"]["chapters"] = json!({
        "container": "a.chapter",
        "name": "span",
        "url": "_container_"
    });
    let scanlator = single("toonsite", entry, StubSite::new());
    let markup = r#"
        <a class="chapter" href="https://toonsite.example/series/solo/chapter-2"><span>Ch. 2</span></a>
        <a class="chapter" href="https://toonsite.example/series/solo/chapter-1"><span>Ch. 1</span></a>"#;

    let chapters = scanlator
        .get_chapters(markup, "https://toonsite.example/series/solo")
        .unwrap();
    let names: Vec<_> = chapters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Chapter 1", "Chapter 2"]);
    assert_eq!(chapters[1].url, "https://toonsite.example/series/solo/chapter-2");
}

#[test]
fn test_manga_id_is_stable_under_canonicalization() {
    let scanlator = single("toonsite", toonsite(HOST), StubSite::new());
    let url = "https://toonsite.example/series/solo-leveling/";
    let id = scanlator.get_manga_id(url).unwrap();
    let canonical = scanlator.canonical_url(url);

    assert_eq!(id, "solo-leveling");
    assert_eq!(canonical, "https://toonsite.example/series/solo-leveling");
    assert_eq!(scanlator.get_manga_id(&canonical).unwrap(), id);
    assert!(scanlator.get_manga_id("https://toonsite.example/about").is_err());
}

fn rotating_site() -> serde_json::Value {
    json!({
        "request_method": "http",
        "url_regex": r"https?://rizz\.example/(series/)?(?P<id>r\d+-)?(?P<url_name>[\w-]+?)/?$",
        "properties": {
            "base_url": "https://rizz.example",
            "format_urls": { "manga": "https://rizz.example/series/{id}-{url_name}" },
            "latest_updates_url": "https://rizz.example/latest",
            "dynamic_url": true,
            "missing_id_connector": { "char": "-" },
            "chapter_regex": r"(?P<before_id>https?://rizz\.example/)r\d+-(?P<after_id>.+)"
        },
        "selectors": {
            "title": ["h1"],
            "chapters": { "container": "li", "name": "a", "url": "a[href]" },
            "front_page": {
                "container": "div.item",
                "title": "h3",
                "url": "a.series[href]",
                "chapters": { "container": "li", "name": "a", "url": "a[href]" }
            }
        }
    })
}

const ROTATING_FRONT_PAGE: &str = r#"
    <div class="item">
      <a class="series" href="https://rizz.example/series/r999-solo"><h3>Solo</h3></a>
      <ul><li><a href="https://rizz.example/r777-solo-chapter-5">Chapter 5</a></li></ul>
    </div>"#;

#[tokio::test]
async fn test_rotating_ids_are_stored_as_placeholder() {
    let site = StubSite::new();
    site.page("https://rizz.example/latest", ROTATING_FRONT_PAGE);
    let scanlator = single("rizz", rotating_site(), site);

    let partials = scanlator.get_front_page().await.unwrap();
    assert_eq!(partials.len(), 1);
    let solo = &partials[0];
    assert_eq!(solo.key.id, "solo");
    assert_eq!(solo.url, "https://rizz.example/series/{id}-solo");
    assert_eq!(solo.latest_chapters[0].url, "https://rizz.example/{id}-solo-chapter-5");

    // the ids seen on the front page are put back for requests
    assert_eq!(
        scanlator.resolve_chapter_url(&solo.latest_chapters[0].url),
        "https://rizz.example/r777-solo-chapter-5"
    );
}

#[tokio::test]
async fn test_rotating_series_page_retries_without_id() {
    let site = StubSite::new();
    site.page("https://rizz.example/latest", ROTATING_FRONT_PAGE);
    // the learned id went stale: only the id-less form answers
    site.page(
        "https://rizz.example/series/solo",
        r#"<h1>Solo</h1><ul><li><a href="https://rizz.example/r778-solo-chapter-6">Chapter 6</a></li></ul>"#,
    );
    let scanlator = single("rizz", rotating_site(), site.clone());
    scanlator.get_front_page().await.unwrap();

    let markup = scanlator
        .fetch_markup("https://rizz.example/series/{id}-solo")
        .await
        .unwrap();
    assert_eq!(site.hits("https://rizz.example/series/r999-solo"), 1);
    assert_eq!(site.hits("https://rizz.example/series/solo"), 1);

    let chapters = scanlator
        .get_chapters(&markup, "https://rizz.example/series/{id}-solo")
        .unwrap();
    assert_eq!(chapters[0].url, "https://rizz.example/{id}-solo-chapter-6");
}

fn searchable_site(as_type: &str) -> serde_json::Value {
    let mut entry = toonsite(HOST);
    entry["selectors"]["search"] = json!({
        "container": "div.result",
        "title": "h3",
        "url": "a[href]"
    });
    entry["search"] = json!({
        "url": "https://toonsite.example/search",
        "search_param_name": "q",
        "extra_params": { "type": "manga", "adult": null },
        "as_type": as_type,
        "query_parsing": { "encoding": null, "regex": [{ "pattern": r"\s+", "sub_value": "+" }] },
        "request_method": "GET"
    });
    entry
}

#[test]
fn test_search_request_as_query_params() {
    let scanlator = single("toonsite", searchable_site("param"), StubSite::new());
    let request = scanlator.context().search_request("solo  leveling").unwrap();

    assert_eq!(request.url, "https://toonsite.example/search");
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.params["q"], "solo+leveling");
    assert_eq!(request.params["type"], "manga");
    assert_eq!(request.params["adult"], "");
}

#[test]
fn test_search_request_as_form_data() {
    let scanlator = single("toonsite", searchable_site("data"), StubSite::new());
    let request = scanlator.context().search_request("solo").unwrap();

    assert_eq!(request.method, HttpMethod::Post);
    let form = request.form.unwrap();
    assert_eq!(form["q"], "solo");
    assert_eq!(form["type"], "manga");
}

#[tokio::test]
async fn test_search_results_are_parsed() {
    let site = StubSite::new();
    site.page(
        "https://toonsite.example/search",
        r#"<div class="result"><a href="/series/solo"><h3>Solo</h3></a></div>
           <div class="result"><a href="/about"><h3>Not a series</h3></a></div>"#,
    );
    let scanlator = single("toonsite", searchable_site("param"), site);
    assert!(scanlator.supports_search());

    let found = scanlator.search("solo").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key.id, "solo");
    assert_eq!(found[0].url, "https://toonsite.example/series/solo");
}

#[tokio::test]
async fn test_search_without_descriptor_is_unsupported() {
    let scanlator = single("toonsite", toonsite(HOST), StubSite::new());
    assert!(!scanlator.supports_search());
    let err = scanlator.search("solo").await.unwrap_err();
    assert!(err.to_string().contains("does not support search"));
}
