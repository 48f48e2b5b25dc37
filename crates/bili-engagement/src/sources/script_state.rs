//! Embedded state blob source.
//!
//! Video pages assign their initial state to a global in an inline script
//! (`window.__INITIAL_STATE__={...};(function(){...})()`). The first block
//! whose literal parses wins; later blocks are not inspected.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::{json_count, json_text};
use crate::types::PartialRecord;

/// Which global the literal was assigned to. The two carry the video under
/// different paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateKind {
    InitialState,
    NextData,
}

impl StateKind {
    fn video_pointer(self) -> &'static str {
        match self {
            StateKind::InitialState => "/videoData",
            StateKind::NextData => "/props/pageProps/videoData",
        }
    }

    fn name(self) -> &'static str {
        match self {
            StateKind::InitialState => "window.__INITIAL_STATE__",
            StateKind::NextData => "__NEXT_DATA__",
        }
    }
}

fn assignment_res() -> &'static [(StateKind, Regex); 2] {
    static RES: OnceLock<[(StateKind, Regex); 2]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            (
                StateKind::InitialState,
                Regex::new(r"window\.__INITIAL_STATE__\s*=\s*").expect("initial state regex is valid"),
            ),
            (
                StateKind::NextData,
                Regex::new(r"__NEXT_DATA__\s*=\s*").expect("next data regex is valid"),
            ),
        ]
    })
}

/// Extract a partial record from the state blob embedded in `html`.
pub fn extract_script_state(html: &str) -> PartialRecord {
    let document = Html::parse_document(html);
    let sel = Selector::parse("script").expect("script selector is valid");

    for element in document.select(&sel) {
        let text: String = element.text().collect();
        let Some((kind, start)) = locate_assignment(&text) else {
            continue;
        };

        match parse_state_literal(&text[start..]) {
            Ok(state) => {
                debug!("parsed {} state blob", kind.name());
                return read_video_data(kind, &state);
            }
            Err(e) => {
                warn!("failed to parse {} state blob: {e}", kind.name());
            }
        }
    }

    debug!("no embedded state blob found");
    PartialRecord::default()
}

/// Byte offset of the literal following a known assignment.
fn locate_assignment(script: &str) -> Option<(StateKind, usize)> {
    assignment_res()
        .iter()
        .find_map(|(kind, re)| re.find(script).map(|m| (*kind, m.end())))
}

/// Isolate the literal at the first statement terminator or function
/// boundary. If that cut lands inside the literal, stream-parse the first
/// complete JSON value instead.
fn parse_state_literal(rest: &str) -> Result<Value, serde_json::Error> {
    let cut_at = [rest.find(';'), rest.find("(function")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(rest.len());

    match serde_json::from_str::<Value>(rest[..cut_at].trim()) {
        Ok(state) => Ok(state),
        Err(cut_err) => {
            let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
            match stream.next() {
                Some(Ok(state)) => Ok(state),
                _ => Err(cut_err),
            }
        }
    }
}

fn read_video_data(kind: StateKind, state: &Value) -> PartialRecord {
    let Some(video) = state.pointer(kind.video_pointer()) else {
        debug!("{} has no video data", kind.name());
        return PartialRecord::default();
    };

    let count = |path: &str| video.pointer(path).and_then(json_count);
    let text = |path: &str| video.pointer(path).and_then(json_text);

    PartialRecord {
        title: text("/title"),
        description: text("/desc"),
        play_count: count("/stat/view"),
        danmaku_count: count("/stat/danmaku"),
        comment_count: count("/stat/reply"),
        favorite_count: count("/stat/favorite"),
        coin_count: count("/stat/coin"),
        share_count: count("/stat/share"),
        like_count: count("/stat/like"),
        publish_time: count("/pubdate").and_then(unix_time),
        owner_name: text("/owner/name"),
        owner_id: count("/owner/mid"),
    }
}

fn unix_time(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(i64::try_from(secs).ok()?, 0)
}
