//! Platform API endpoints: comments, metadata, stats and overlay captions.
//!
//! Requests are described as [`PageRequest`]s and responses interpreted
//! here; the [`PagedFetcher`](crate::fetcher::PagedFetcher) does the I/O.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use tracing::{debug, warn};

use crate::fetcher::{PageBody, PageProgress, PageRequest, PagedResource};
use crate::sources::{json_count, json_text};
use crate::types::{CaptionEntry, CommentThread, ContentId, FetchError, VideoMeta, VideoStats, UNKNOWN_AUTHOR};

/// Envelope codes the platform uses when it throttles a client.
const THROTTLE_CODES: &[i64] = &[-412, -352, -509];

/// Unwrap the `{code, message, data}` envelope.
///
/// Payloads without a `code` are returned unchanged. An empty object is
/// malformed so that the caller retries it.
pub fn api_data(body: Value) -> Result<Value, FetchError> {
    let Value::Object(mut map) = body else {
        return Err(FetchError::MalformedPayload("expected a JSON object".to_string()));
    };
    if map.is_empty() {
        return Err(FetchError::MalformedPayload("empty response object".to_string()));
    }
    let Some(code) = map.get("code") else {
        return Ok(Value::Object(map));
    };
    let code = code
        .as_i64()
        .ok_or_else(|| FetchError::MalformedPayload(format!("non-integer code {code}")))?;
    if code == 0 {
        return Ok(map.remove("data").unwrap_or(Value::Null));
    }

    let message = map.get("message").and_then(Value::as_str).unwrap_or_default();
    if THROTTLE_CODES.contains(&code) {
        Err(FetchError::RateLimited(format!("code {code}: {message}")))
    } else {
        Err(FetchError::MalformedPayload(format!("code {code}: {message}")))
    }
}

// ── Comments ──

/// Top-level comments of one video, newest-first pages of `page_size`.
pub struct CommentResource {
    api_base: String,
    id: ContentId,
    aid: u64,
    page_size: u32,
}

impl CommentResource {
    pub fn new(api_base: &str, id: ContentId, aid: u64, page_size: u32) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            id,
            aid,
            page_size: page_size.max(1),
        }
    }
}

impl PagedResource for CommentResource {
    type Item = CommentThread;

    fn resource_id(&self) -> String {
        format!("comments:{}", self.id)
    }

    fn page_request(&self, page: u32) -> PageRequest {
        PageRequest::new(format!("{}/x/v2/reply", self.api_base))
            .param("type", 1)
            .param("oid", self.aid)
            .param("pn", page)
            .param("ps", self.page_size)
            .param("sort", 0)
    }

    fn parse_page(&self, body: Value) -> Result<PageBody<CommentThread>, FetchError> {
        parse_comment_page(body)
    }
}

/// Interpret one comment page.
///
/// A page whose `replies` is missing or not a list means the collection is
/// exhausted. Comments without a message are skipped.
pub fn parse_comment_page(body: Value) -> Result<PageBody<CommentThread>, FetchError> {
    let data = api_data(body)?;
    let Some(replies) = data.get("replies").and_then(Value::as_array) else {
        return Ok(PageBody::NoMoreData);
    };

    let mut items = Vec::with_capacity(replies.len());
    let mut skipped = 0;
    for (index, raw) in replies.iter().enumerate() {
        match parse_thread(raw) {
            Some(thread) => items.push(thread),
            None => {
                skipped += 1;
                warn!("skipping comment #{index}: no message");
            }
        }
    }

    Ok(PageBody::Items {
        items,
        skipped,
        progress: data.get("page").and_then(page_progress),
    })
}

fn parse_thread(raw: &Value) -> Option<CommentThread> {
    let body = message_of(raw)?;
    let author = raw
        .pointer("/member/uname")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string();

    let replies = raw
        .get("replies")
        .and_then(Value::as_array)
        .map(|replies| {
            replies
                .iter()
                .filter_map(|reply| {
                    let message = message_of(reply);
                    if message.is_none() {
                        debug!("reply without message dropped");
                    }
                    message
                })
                .map(|message| format!("回复@{author}: {message}"))
                .collect()
        })
        .unwrap_or_default();

    Some(CommentThread {
        body,
        author,
        replies,
    })
}

/// Non-empty `content.message` of a comment or reply.
fn message_of(raw: &Value) -> Option<String> {
    raw.pointer("/content/message")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn page_progress(page: &Value) -> Option<PageProgress> {
    Some(PageProgress {
        num: page.get("num")?.as_u64()?,
        size: page.get("size")?.as_u64()?,
        count: page.get("count")?.as_u64()?,
    })
}

// ── Metadata and stats ──

pub fn meta_request(api_base: &str, id: &ContentId) -> PageRequest {
    PageRequest::new(format!("{}/x/web-interface/view", api_base.trim_end_matches('/')))
        .param("bvid", id)
}

pub fn parse_meta(body: Value) -> Result<VideoMeta, FetchError> {
    let data = api_data(body)?;
    let aid = data
        .get("aid")
        .and_then(json_count)
        .ok_or_else(|| FetchError::MalformedPayload("view payload has no aid".to_string()))?;

    Ok(VideoMeta {
        aid,
        title: data.get("title").and_then(json_text).unwrap_or_default(),
        description: data.get("desc").and_then(json_text).unwrap_or_default(),
    })
}

pub fn stats_request(api_base: &str, id: &ContentId) -> PageRequest {
    PageRequest::new(format!(
        "{}/x/web-interface/archive/stat",
        api_base.trim_end_matches('/')
    ))
    .param("bvid", id)
}

pub fn parse_stats(body: Value) -> Result<VideoStats, FetchError> {
    let data = api_data(body)?;
    if !data.is_object() {
        return Err(FetchError::MalformedPayload("stat payload is not an object".to_string()));
    }
    let count = |key: &str| data.get(key).and_then(json_count).unwrap_or(0);

    Ok(VideoStats {
        view: count("view"),
        danmaku: count("danmaku"),
        reply: count("reply"),
        favorite: count("favorite"),
        coin: count("coin"),
        share: count("share"),
        like: count("like"),
    })
}

// ── Captions ──

pub fn pagelist_request(api_base: &str, id: &ContentId) -> PageRequest {
    PageRequest::new(format!("{}/x/player/pagelist", api_base.trim_end_matches('/')))
        .param("bvid", id)
        .param("jsonp", "jsonp")
}

/// `cid` of the first part of a video.
pub fn parse_first_cid(body: Value) -> Result<u64, FetchError> {
    let data = api_data(body)?;
    data.pointer("/0/cid")
        .and_then(json_count)
        .filter(|cid| *cid != 0)
        .ok_or_else(|| FetchError::MalformedPayload("page list has no cid".to_string()))
}

pub fn captions_request(api_base: &str, cid: u64) -> PageRequest {
    PageRequest::new(format!("{}/x/v1/dm/list.so", api_base.trim_end_matches('/'))).param("oid", cid)
}

/// Text of every `<d>` element, in document order.
pub fn parse_captions(xml: &str) -> Result<Vec<CaptionEntry>, FetchError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"d" => {
                current = Some(String::new());
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"d" => {
                entries.push(CaptionEntry { text: String::new() });
            }
            Ok(Event::Text(e)) => {
                if let Some(text) = current.as_mut() {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| FetchError::MalformedPayload(format!("caption text: {err}")))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(text) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"d" => {
                if let Some(text) = current.take() {
                    entries.push(CaptionEntry { text });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FetchError::MalformedPayload(format!(
                    "caption XML error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}
