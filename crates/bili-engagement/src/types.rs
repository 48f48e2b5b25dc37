//! Core data types for engagement records and harvest output.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::fetcher::FetchReport;

/// Prefix shared by every content id.
pub const CONTENT_ID_PREFIX: &str = "BV";

/// Fixed length of a content id, prefix included.
pub const CONTENT_ID_LEN: usize = 12;

/// Author label used when a comment carries no member block.
pub const UNKNOWN_AUTHOR: &str = "未知用户";

const AID_ALPHABET: &[u8; 58] = b"FcwAPNKTMug3GV5Lj7EJnHpWsx4tb8haYeviqBz6rkCy12mUSDQX9RdoZf";
const AID_XOR: u64 = 23_442_827_791_579;
const AID_MASK: u64 = 2_251_799_813_685_247;

/// Identifier of one video, e.g. `BV1xx411c7mD`.
///
/// Validated by format only: `BV` followed by ten ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Parse and validate a content id.
    pub fn parse(raw: &str) -> HarvestResult<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == CONTENT_ID_LEN
            && raw.starts_with(CONTENT_ID_PREFIX)
            && raw.bytes().all(|b| b.is_ascii_alphanumeric());

        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(HarvestError::InvalidContentId(raw.to_string()))
        }
    }

    /// Find the first content id embedded in a URL or arbitrary text.
    pub fn find_in(text: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"BV[0-9A-Za-z]{10}").expect("content id regex is valid"));
        re.find(text).map(|m| Self(m.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Video page URL under the given base (e.g. `https://www.bilibili.com/video/`).
    pub fn url(&self, video_base: &str) -> String {
        format!("{}/{}", video_base.trim_end_matches('/'), self.0)
    }

    /// Decode the numeric archive id without a network round trip.
    ///
    /// Returns `None` for ids outside the platform alphabet, which are still
    /// valid by format but cannot be decoded.
    pub fn aid(&self) -> Option<u64> {
        let bytes = self.0.as_bytes();
        if bytes.get(2) != Some(&b'1') {
            return None;
        }

        let mut digits: [u8; 9] = bytes.get(3..CONTENT_ID_LEN)?.try_into().ok()?;
        digits.swap(0, 6);
        digits.swap(1, 4);

        let mut acc: u64 = 0;
        for d in digits {
            let idx = AID_ALPHABET.iter().position(|&c| c == d)? as u64;
            acc = acc.checked_mul(58)?.checked_add(idx)?;
        }

        Some((acc & AID_MASK) ^ AID_XOR)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

/// Consolidated engagement record for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub play_count: u64,
    pub danmaku_count: u64,
    pub comment_count: u64,
    pub favorite_count: u64,
    pub coin_count: u64,
    pub share_count: u64,
    pub like_count: u64,
    pub publish_time: Option<DateTime<Utc>>,
    pub owner_name: String,
    pub owner_id: u64,
}

impl VideoRecord {
    /// A record with every field at its default.
    pub fn empty(id: &ContentId, url: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            url: url.into(),
            title: String::new(),
            description: String::new(),
            play_count: 0,
            danmaku_count: 0,
            comment_count: 0,
            favorite_count: 0,
            coin_count: 0,
            share_count: 0,
            like_count: 0,
            publish_time: None,
            owner_name: String::new(),
            owner_id: 0,
        }
    }
}

/// Per-source view of a video record. `None` means the source reported
/// nothing, which is distinct from `Some(0)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    pub play_count: Option<u64>,
    pub danmaku_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub favorite_count: Option<u64>,
    pub coin_count: Option<u64>,
    pub share_count: Option<u64>,
    pub like_count: Option<u64>,
    pub publish_time: Option<DateTime<Utc>>,
    pub owner_name: Option<String>,
    pub owner_id: Option<u64>,
}

impl PartialRecord {
    /// Number of fields the source reported.
    pub fn populated(&self) -> usize {
        let text = [&self.title, &self.description, &self.owner_name]
            .iter()
            .filter(|f| f.is_some())
            .count();
        let counts = [
            self.play_count,
            self.danmaku_count,
            self.comment_count,
            self.favorite_count,
            self.coin_count,
            self.share_count,
            self.like_count,
            self.owner_id,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count();
        text + counts + usize::from(self.publish_time.is_some())
    }
}

/// A top-level comment with its inline replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    pub body: String,
    /// Author of the top-level comment; replies are attributed to it.
    pub author: String,
    /// Replies rendered as `回复@<author>: <message>`.
    pub replies: Vec<String>,
}

/// One timed overlay caption line, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionEntry {
    pub text: String,
}

/// Basic metadata from the video info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub aid: u64,
    pub title: String,
    pub description: String,
}

/// Aggregate counters from the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoStats {
    pub view: u64,
    pub danmaku: u64,
    pub reply: u64,
    pub favorite: u64,
    pub coin: u64,
    pub share: u64,
    pub like: u64,
}

/// Everything gathered for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub video: VideoRecord,
    pub comments: Vec<CommentThread>,
    pub captions: Vec<CaptionEntry>,
    pub meta: Option<VideoMeta>,
    pub stats: Option<VideoStats>,
    pub comment_fetch: FetchReport,
}

/// One output entry per requested id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarvestEntry {
    Harvested(HarvestRecord),
    Failed { id: String, error: String },
}

impl HarvestEntry {
    pub fn id(&self) -> &str {
        match self {
            HarvestEntry::Harvested(record) => &record.video.id,
            HarvestEntry::Failed { id, .. } => id,
        }
    }
}

/// Counters for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub harvested: usize,
    pub failed: usize,
}

/// Failure taxonomy for page, single-shot and render requests.
///
/// Running out of data is not represented here; see
/// [`PageBody::NoMoreData`](crate::fetcher::PageBody::NoMoreData).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Capability lost: {0}")]
    CapabilityLost(String),
}

impl FetchError {
    pub fn is_capability_loss(&self) -> bool {
        matches!(self, FetchError::CapabilityLost(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited(_))
    }
}

/// Errors that surface from the harvest pipeline.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Invalid content id: {0:?}")]
    InvalidContentId(String),

    #[error("Render failed: {0}")]
    Render(FetchError),

    #[error("Capability lost: {0}")]
    CapabilityLost(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;
