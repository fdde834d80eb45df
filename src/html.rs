//! Markup helpers shared by the adapters.
//!
//! Everything here is synchronous: `scraper::Html` is not `Send`, so parsed
//! documents never live across an `.await`.

use crate::descriptor::{attribute_of, SelectorTarget};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

const COVER_ATTRIBUTES: &[&str] = &["data-src", "src", "href", "content", "data-lazy-src", "style"];

/// Parse a document and detach every node matching one of `unwanted`.
pub fn parse_document(markup: &str, unwanted: &[String]) -> Html {
    let mut document = Html::parse_document(markup);
    for css in unwanted {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let ids: Vec<_> = document.select(&selector).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }
    document
}

pub fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            log::error!("Invalid selector '{}': {}", css, e);
            None
        }
    }
}

pub fn select_first<'a>(scope: ElementRef<'a>, target: &SelectorTarget) -> Option<ElementRef<'a>> {
    match target {
        SelectorTarget::Container => Some(scope),
        SelectorTarget::Css(css) => {
            let selector = selector(css)?;
            scope.select(&selector).next()
        }
    }
}

pub fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(selector) => scope.select(&selector).collect(),
        None => Vec::new(),
    }
}

/// Text with whitespace runs collapsed to single spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of each text node on its own line.
pub fn element_text_lines(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read the value a selector points at: the attribute for `tag[attr]`
/// selectors, the collapsed text otherwise.
pub fn extract_value(scope: ElementRef<'_>, target: &SelectorTarget) -> Option<String> {
    let element = select_first(scope, target)?;
    let value = match target.attribute() {
        Some(attr) => element.value().attr(attr)?.trim().to_string(),
        None => element_text(element),
    };
    (!value.is_empty()).then_some(value)
}

/// Read a link. Plain selectors read `href`; `tag[attr]` selectors read
/// that attribute.
pub fn extract_link(scope: ElementRef<'_>, target: &SelectorTarget) -> Option<String> {
    let element = select_first(scope, target)?;
    let attr = target.css().and_then(attribute_of).unwrap_or("href");
    element
        .value()
        .attr(attr)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn style_url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).ok())
        .as_ref()
}

/// First usable image link on `element`, made absolute against `base_url`.
pub fn extract_cover_link(element: ElementRef<'_>, base_url: &str) -> Option<String> {
    for attr in COVER_ATTRIBUTES {
        let Some(value) = element.value().attr(attr) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let link = if *attr == "style" {
            let captures = style_url_regex()?.captures(value)?;
            captures.get(1)?.as_str().trim().to_string()
        } else {
            value.to_string()
        };
        if link.starts_with("data:") {
            continue;
        }
        return Some(absolutize(base_url, &link).replace(' ', "%20"));
    }
    None
}

/// Join a possibly relative link onto `base_url`.
pub fn absolutize(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    if let Some(rest) = link.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    match Url::parse(base_url).and_then(|base| base.join(link)) {
        Ok(url) => url.to_string(),
        Err(_) => format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            link.trim_start_matches('/')
        ),
    }
}

/// `"Ch. 12\n  New"` becomes `"Chapter 12 New"`.
pub fn clean_chapter_name(name: &str) -> String {
    collapse_whitespace(&name.replace('\n', " ").replace("Ch.", "Chapter"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="ads"><h1>Ad title</h1></div>
          <h1 class="title">  Solo   Leveling </h1>
          <div class="cover" style="background-image: url('/covers/solo.webp')"></div>
          <img class="thumb" data-src="https://cdn.example/solo.jpg" src="data:image/gif;base64,AAAA">
          <a class="first" href="/series/solo/chapter-1">Ch. 1</a>
        </body></html>
    "#;

    #[test]
    fn test_unwanted_tags_are_removed() {
        let document = parse_document(PAGE, &[".ads".to_string()]);
        let target = SelectorTarget::Css("h1".to_string());
        let title = extract_value(document.root_element(), &target);
        assert_eq!(title.as_deref(), Some("Solo Leveling"));
    }

    #[test]
    fn test_attribute_selector_reads_attribute() {
        let document = parse_document(PAGE, &[]);
        let target = SelectorTarget::Css("a.first[href]".to_string());
        let value = extract_value(document.root_element(), &target);
        assert_eq!(value.as_deref(), Some("/series/solo/chapter-1"));
    }

    #[test]
    fn test_cover_from_inline_style() {
        let document = parse_document(PAGE, &[]);
        let sel = Selector::parse("div.cover").unwrap();
        let element = document.select(&sel).next().unwrap();
        assert_eq!(
            extract_cover_link(element, "https://toonsite.example").as_deref(),
            Some("https://toonsite.example/covers/solo.webp")
        );
    }

    #[test]
    fn test_cover_prefers_data_src_over_placeholder() {
        let document = parse_document(PAGE, &[]);
        let sel = Selector::parse("img.thumb").unwrap();
        let element = document.select(&sel).next().unwrap();
        assert_eq!(
            extract_cover_link(element, "https://toonsite.example").as_deref(),
            Some("https://cdn.example/solo.jpg")
        );
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://toonsite.example", "/series/a"),
            "https://toonsite.example/series/a"
        );
        assert_eq!(
            absolutize("https://toonsite.example/", "https://other.example/x"),
            "https://other.example/x"
        );
        assert_eq!(absolutize("https://toonsite.example", "//cdn.example/x.png"), "https://cdn.example/x.png");
    }

    #[test]
    fn test_clean_chapter_name() {
        assert_eq!(clean_chapter_name("Ch. 12\n   New  "), "Chapter 12 New");
    }
}
