//! Harvest tuning knobs.

use serde::{Deserialize, Serialize};

use crate::fetcher::FetchPolicy;
use crate::pacing::{DelayRange, DEFAULT_USER_AGENTS};

/// Configuration for one harvester. Every field has a default, so partial
/// config files deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Root of the JSON/XML endpoints.
    pub api_base: String,
    /// Prefix of video page URLs.
    pub video_base: String,

    /// Upper bound on comment threads per video.
    pub max_comments: usize,
    pub comment_page_size: u32,
    /// Consecutive failed page requests before giving up on a resource.
    pub failure_threshold: u32,

    /// Delay before every page request.
    pub page_delay: DelayRange,
    /// Delay after a failed page request.
    pub backoff: DelayRange,
    /// Delay after the remote side signalled throttling.
    pub rate_limit_backoff: DelayRange,
    /// Take a short breather after this many accumulated items (0 disables).
    pub breather_every: usize,
    pub breather: DelayRange,
    /// Delay before metadata, stats and caption requests.
    pub single_shot_delay: DelayRange,
    /// Delay between videos in a batch.
    pub item_delay: DelayRange,

    /// Seed for jitter and identity rotation.
    pub seed: Option<u64>,
    pub user_agents: Vec<String>,
    /// Raw `Cookie` header of a logged-in session, e.g.
    /// `SESSDATA=..; bili_jct=..; buvid3=..`. Anonymous when unset.
    pub cookies: Option<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            video_base: "https://www.bilibili.com/video/".to_string(),
            max_comments: 10_000,
            comment_page_size: 20,
            failure_threshold: 3,
            page_delay: DelayRange::from_secs(2, 5),
            backoff: DelayRange::from_secs(10, 15),
            rate_limit_backoff: DelayRange::from_secs(15, 30),
            breather_every: 10,
            breather: DelayRange::from_millis(500, 1_500),
            single_shot_delay: DelayRange::from_secs(1, 3),
            item_delay: DelayRange::from_secs(10, 20),
            seed: None,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            cookies: None,
        }
    }
}

impl HarvestConfig {
    /// The fetch policy derived from this configuration.
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_items: self.max_comments,
            failure_threshold: self.failure_threshold.max(1),
            page_delay: self.page_delay,
            backoff: self.backoff,
            rate_limit_backoff: self.rate_limit_backoff,
            breather_every: self.breather_every,
            breather: self.breather,
            single_shot_delay: self.single_shot_delay,
        }
    }

    /// Same configuration with every delay set to zero.
    pub fn without_delays(mut self) -> Self {
        for range in [
            &mut self.page_delay,
            &mut self.backoff,
            &mut self.rate_limit_backoff,
            &mut self.breather,
            &mut self.single_shot_delay,
            &mut self.item_delay,
        ] {
            *range = DelayRange::ZERO;
        }
        self
    }
}
