use crate::descriptor::SiteDescriptor;
use crate::html;
use crate::models::SeriesStatus;
use crate::request::Fetcher;
use crate::scanlators::{Scanlator, SiteContext};
use std::sync::Arc;

/// Mangapark shows two status slots (original work and upload) that often
/// disagree; the cover is painted through an inline style.
pub struct Mangapark {
    context: SiteContext,
}

impl Mangapark {
    pub fn new(name: &str, site: SiteDescriptor, fetcher: Arc<Fetcher>) -> Self {
        Self {
            context: SiteContext::new(name, site, fetcher),
        }
    }
}

/// First status that is not terminal, else the first one found.
fn pick_status(found: &[SeriesStatus]) -> SeriesStatus {
    found
        .iter()
        .copied()
        .find(|s| !s.is_terminal() && *s != SeriesStatus::Unknown)
        .or_else(|| found.first().copied())
        .unwrap_or(SeriesStatus::Unknown)
}

impl Scanlator for Mangapark {
    fn context(&self) -> &SiteContext {
        &self.context
    }

    fn get_status(&self, markup: &str) -> SeriesStatus {
        let found: Vec<SeriesStatus> = self
            .context
            .status_texts(markup)
            .iter()
            .map(|text| self.context.status_from_text(text))
            .collect();
        pick_status(&found)
    }

    fn get_cover(&self, markup: &str) -> Option<String> {
        let site = &self.context.site;
        let document = html::parse_document(markup, &site.selectors.unwanted_tags);
        let root = document.root_element();

        let styled = site.selectors.cover.iter().find_map(|target| {
            let css = target.css()?;
            html::select_all(root, css)
                .into_iter()
                .filter(|el| el.value().attr("style").is_some())
                .find_map(|el| html::extract_cover_link(el, site.base_url()))
        });
        styled.or_else(|| self.context.extract_cover(markup))
    }
}
