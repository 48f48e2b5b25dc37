//! Rendered markup source: CSS selector chains per field.
//!
//! Each field has a primary selector followed by fallbacks. The first
//! selector whose first match has non-empty text wins. Count fields go
//! through [`normalize_count`].

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::normalize::normalize_count;
use crate::types::PartialRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkupField {
    Title,
    Description,
    PlayCount,
    DanmakuCount,
    LikeCount,
    CoinCount,
    FavoriteCount,
    ShareCount,
    OwnerName,
}

struct FieldRule {
    field: MarkupField,
    selectors: &'static [&'static str],
    /// Joins the trimmed text nodes of the matched element.
    separator: &'static str,
}

const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        field: MarkupField::Title,
        selectors: &[
            "#viewbox_report > div.video-info-title > div > h1",
            "h1.video-title",
        ],
        separator: "",
    },
    FieldRule {
        field: MarkupField::Description,
        selectors: &["#v_desc > div.basic-desc-info", "#v_desc .desc-info-text"],
        separator: "\n",
    },
    FieldRule {
        field: MarkupField::PlayCount,
        selectors: &[
            "#viewbox_report > div.video-info-meta > div > div.view.item > div",
            "#viewbox_report .view-text",
        ],
        separator: "",
    },
    FieldRule {
        field: MarkupField::DanmakuCount,
        selectors: &[
            "#bilibili-player > div > div > div.bpx-player-primary-area > div.bpx-player-sending-area > div > div.bpx-player-video-info > div.bpx-player-video-info-dm > span",
            "span.dm",
        ],
        separator: "",
    },
    FieldRule {
        field: MarkupField::LikeCount,
        selectors: &[
            "#arc_toolbar_report > div.video-toolbar-left > div.video-toolbar-left-main > div:nth-child(1) > div > span",
            "span.like",
        ],
        separator: "",
    },
    FieldRule {
        field: MarkupField::CoinCount,
        selectors: &[
            "#arc_toolbar_report > div.video-toolbar-left > div.video-toolbar-left-main > div:nth-child(2) > div > span",
            "span.coin",
        ],
        separator: "",
    },
    FieldRule {
        field: MarkupField::FavoriteCount,
        selectors: &[
            "#arc_toolbar_report > div.video-toolbar-left > div.video-toolbar-left-main > div:nth-child(3) > div > span",
            "span.fav",
        ],
        separator: "",
    },
    FieldRule {
        field: MarkupField::ShareCount,
        selectors: &["#share-btn-outer > div > span", "span.share"],
        separator: "",
    },
    FieldRule {
        field: MarkupField::OwnerName,
        selectors: &[
            "#v_upinfo > div.up-info > div.up-detail > a",
            "div.up-info .username",
            ".up-info .name",
            ".up-info span",
            "a.up-name",
        ],
        separator: "",
    },
];

/// Extract a partial record from rendered page markup.
///
/// The comment count is not read here: it lives inside isolated subtrees
/// that ordinary queries cannot see.
pub fn extract_rendered(html: &str) -> PartialRecord {
    let document = Html::parse_document(html);
    let mut partial = PartialRecord::default();

    for rule in FIELD_RULES {
        let Some(text) = first_text(&document, rule.selectors, rule.separator) else {
            debug!("rendered markup: no match for {:?}", rule.field);
            continue;
        };

        match rule.field {
            MarkupField::Title => partial.title = Some(text),
            MarkupField::Description => partial.description = Some(text),
            MarkupField::OwnerName => partial.owner_name = Some(text),
            MarkupField::PlayCount => partial.play_count = Some(normalize_count(&text)),
            MarkupField::DanmakuCount => partial.danmaku_count = Some(normalize_count(&text)),
            MarkupField::LikeCount => partial.like_count = Some(normalize_count(&text)),
            MarkupField::CoinCount => partial.coin_count = Some(normalize_count(&text)),
            MarkupField::FavoriteCount => partial.favorite_count = Some(normalize_count(&text)),
            MarkupField::ShareCount => partial.share_count = Some(normalize_count(&text)),
        }
    }

    partial
}

fn first_text(document: &Html, selectors: &[&str], separator: &str) -> Option<String> {
    selectors.iter().find_map(|raw| {
        let sel = match Selector::parse(raw) {
            Ok(sel) => sel,
            Err(e) => {
                warn!("skipping invalid selector {raw:?}: {e:?}");
                return None;
            }
        };
        document
            .select(&sel)
            .next()
            .map(|el| element_text(el, separator))
            .filter(|text| !text.is_empty())
    })
}

fn element_text(element: ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}
