//! Content id discovery from ranking pages.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::debug;

use crate::types::ContentId;

/// Popular ranking page that lists current top videos.
pub const RANKING_URL: &str = "https://www.bilibili.com/v/popular/rank/all";

/// Collect content ids linked from a ranking page, in document order and
/// without duplicates. Ranking entries are preferred; when the page has none,
/// every link on the page is considered.
pub fn discover_ids(html: &str) -> Vec<ContentId> {
    let document = Html::parse_document(html);
    let ranked = Selector::parse(".rank-item a[href]").expect("rank item selector is valid");

    let ids = linked_ids(&document, &ranked);
    if !ids.is_empty() {
        debug!("discovered {} id(s) in ranking entries", ids.len());
        return ids;
    }

    let any = Selector::parse("a[href]").expect("anchor selector is valid");
    let ids = linked_ids(&document, &any);
    debug!("discovered {} id(s) across all links", ids.len());
    ids
}

fn linked_ids(document: &Html, selector: &Selector) -> Vec<ContentId> {
    let mut seen = HashSet::new();
    document
        .select(selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(ContentId::find_in)
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
