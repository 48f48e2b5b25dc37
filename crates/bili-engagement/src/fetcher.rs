//! Paginated and single-shot retrieval with pacing and bounded retries.
//!
//! A [`PagedFetcher`] walks a [`PagedResource`] page by page. Each resource
//! gets its own [`FetchState`]; the consecutive-failure counter resets on
//! every valid page, and reaching the threshold ends the resource as
//! [`FetchStatus::Exhausted`] with whatever was gathered so far. Only
//! capability loss escapes as an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::Transport;
use crate::pacing::{DelayRange, Pacer};
use crate::types::{FetchError, HarvestError, HarvestResult};

/// Lifecycle of one paginated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    InFlight,
    Retrying,
    Completed,
    Exhausted,
}

impl FetchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FetchStatus::Completed | FetchStatus::Exhausted)
    }
}

/// Progress of one paginated resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
    pub resource_id: String,
    /// Page requested next (1-based).
    pub page_cursor: u32,
    pub accumulated_count: usize,
    /// Requests issued so far, retries included.
    pub attempt_count: u32,
    pub status: FetchStatus,
}

impl FetchState {
    pub fn new(resource_id: impl Into<String>, first_page: u32) -> Self {
        Self {
            resource_id: resource_id.into(),
            page_cursor: first_page,
            accumulated_count: 0,
            attempt_count: 0,
            status: FetchStatus::Idle,
        }
    }
}

/// Summary of a finished paginated fetch, kept with the harvested record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub status: FetchStatus,
    /// Valid pages received.
    pub pages: u32,
    pub items: usize,
    /// Items dropped because they were malformed.
    pub skipped: usize,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl FetchReport {
    /// Report for a resource that was never requested.
    pub fn not_attempted() -> Self {
        Self {
            status: FetchStatus::Idle,
            pages: 0,
            items: 0,
            skipped: 0,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Pagination metadata carried by a page (`num`, `size`, `count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    pub num: u64,
    pub size: u64,
    pub count: u64,
}

impl PageProgress {
    /// True once the pages seen so far cover the whole collection.
    pub fn is_complete(&self) -> bool {
        self.num.saturating_mul(self.size) >= self.count
    }
}

/// A successfully interpreted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageBody<T> {
    /// The payload says the collection is exhausted.
    NoMoreData,
    Items {
        items: Vec<T>,
        skipped: usize,
        /// `None` when the page carries no pagination metadata; the fetch
        /// then ends after this page.
        progress: Option<PageProgress>,
    },
}

/// URL and query string of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }
}

/// A collection that is retrieved one page at a time.
pub trait PagedResource: Send + Sync {
    type Item: Send;

    /// Identifier used in logs and the fetch state.
    fn resource_id(&self) -> String;

    fn first_page(&self) -> u32 {
        1
    }

    fn page_request(&self, page: u32) -> PageRequest;

    /// Interpret one page payload. An `Err` counts as an invalid response.
    fn parse_page(&self, body: Value) -> Result<PageBody<Self::Item>, FetchError>;
}

/// Limits and delays applied while fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_items: usize,
    pub failure_threshold: u32,
    pub page_delay: DelayRange,
    pub backoff: DelayRange,
    pub rate_limit_backoff: DelayRange,
    pub breather_every: usize,
    pub breather: DelayRange,
    pub single_shot_delay: DelayRange,
}

/// Items plus the final state of the fetch.
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub state: FetchState,
    pub report: FetchReport,
}

/// Drives paginated and single-shot requests over a [`Transport`].
pub struct PagedFetcher<'a> {
    transport: &'a dyn Transport,
    policy: FetchPolicy,
}

impl<'a> PagedFetcher<'a> {
    pub fn new(transport: &'a dyn Transport, policy: FetchPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetch pages until the collection is exhausted, the item cap is hit or
    /// the failure threshold is reached.
    pub async fn run<R: PagedResource>(
        &self,
        resource: &R,
        pacer: &mut Pacer,
    ) -> HarvestResult<FetchOutcome<R::Item>> {
        let policy = &self.policy;
        let threshold = policy.failure_threshold.max(1);
        let mut state = FetchState::new(resource.resource_id(), resource.first_page());
        let mut items: Vec<R::Item> = Vec::new();
        let mut failures = 0u32;
        let mut pages = 0u32;
        let mut skipped = 0usize;
        let mut last_error = None;

        while !state.status.is_terminal() {
            if items.len() >= policy.max_items {
                state.status = FetchStatus::Completed;
                break;
            }

            state.status = FetchStatus::InFlight;
            state.attempt_count += 1;
            pacer.pause(policy.page_delay).await;

            let request = resource.page_request(state.page_cursor);
            let headers = pacer.identity_headers();
            let result = match self
                .transport
                .get_json(&request.url, &request.params, &headers)
                .await
            {
                Ok(body) => resource.parse_page(body),
                Err(e) => Err(e),
            };

            match result {
                Err(e) if e.is_capability_loss() => {
                    return Err(HarvestError::CapabilityLost(format!("{}: {e}", state.resource_id)));
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "{} page {} failed ({failures}/{threshold}): {e}",
                        state.resource_id, state.page_cursor
                    );
                    let backoff = if e.is_rate_limited() {
                        policy.rate_limit_backoff
                    } else {
                        policy.backoff
                    };
                    last_error = Some(e.to_string());

                    if failures >= threshold {
                        state.status = FetchStatus::Exhausted;
                    } else {
                        state.status = FetchStatus::Retrying;
                        pacer.pause(backoff).await;
                    }
                }
                Ok(PageBody::NoMoreData) => {
                    debug!("{} page {}: no more data", state.resource_id, state.page_cursor);
                    state.status = FetchStatus::Completed;
                }
                Ok(PageBody::Items {
                    items: page_items,
                    skipped: page_skipped,
                    progress,
                }) => {
                    failures = 0;
                    pages += 1;
                    skipped += page_skipped;

                    if page_items.is_empty() {
                        debug!("{} page {}: empty page", state.resource_id, state.page_cursor);
                        state.status = FetchStatus::Completed;
                        continue;
                    }

                    let room = policy.max_items - items.len();
                    for item in page_items.into_iter().take(room) {
                        items.push(item);
                        if policy.breather_every > 0 && items.len() % policy.breather_every == 0 {
                            pacer.pause(policy.breather).await;
                        }
                    }
                    state.accumulated_count = items.len();
                    info!(
                        "{} page {}: {} item(s) so far",
                        state.resource_id,
                        state.page_cursor,
                        items.len()
                    );

                    match progress {
                        Some(p) if !p.is_complete() && items.len() < policy.max_items => {
                            state.page_cursor += 1;
                        }
                        _ => state.status = FetchStatus::Completed,
                    }
                }
            }
        }

        if state.status == FetchStatus::Exhausted {
            warn!(
                "{} gave up after {threshold} consecutive failures with {} item(s)",
                state.resource_id,
                items.len()
            );
        }

        let report = FetchReport {
            status: state.status,
            pages,
            items: items.len(),
            skipped,
            attempts: state.attempt_count,
            last_error,
        };
        Ok(FetchOutcome {
            items,
            state,
            report,
        })
    }

    /// One JSON request. Failures other than capability loss are logged and
    /// come back as `Ok(None)`.
    pub async fn fetch_json<T>(
        &self,
        what: &str,
        request: &PageRequest,
        pacer: &mut Pacer,
        parse: impl FnOnce(Value) -> Result<T, FetchError> + Send,
    ) -> HarvestResult<Option<T>> {
        pacer.pause(self.policy.single_shot_delay).await;
        let headers = pacer.identity_headers();
        let result = match self
            .transport
            .get_json(&request.url, &request.params, &headers)
            .await
        {
            Ok(body) => parse(body),
            Err(e) => Err(e),
        };
        soften(what, result)
    }

    /// One text request, with the same failure handling as [`Self::fetch_json`].
    pub async fn fetch_text<T>(
        &self,
        what: &str,
        request: &PageRequest,
        pacer: &mut Pacer,
        parse: impl FnOnce(String) -> Result<T, FetchError> + Send,
    ) -> HarvestResult<Option<T>> {
        pacer.pause(self.policy.single_shot_delay).await;
        let headers = pacer.identity_headers();
        let result = match self
            .transport
            .get_text(&request.url, &request.params, &headers)
            .await
        {
            Ok(body) => parse(body),
            Err(e) => Err(e),
        };
        soften(what, result)
    }
}

fn soften<T>(what: &str, result: Result<T, FetchError>) -> HarvestResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_capability_loss() => Err(HarvestError::CapabilityLost(format!("{what}: {e}"))),
        Err(e) => {
            warn!("{what} unavailable: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Pairs;
    use crate::pacing::Sleeper;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Value, FetchError>>>,
        requests: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<Value, FetchError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn pages_requested(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|params| params.iter().find(|(k, _)| k == "pn").unwrap().1.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get_json(&self, _url: &str, params: &Pairs, _headers: &Pairs) -> Result<Value, FetchError> {
            self.requests.lock().unwrap().push(params.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::SourceUnavailable("script exhausted".into())))
        }

        async fn get_text(&self, url: &str, params: &Pairs, headers: &Pairs) -> Result<String, FetchError> {
            self.get_json(url, params, headers)
                .await
                .map(|v| v.as_str().unwrap_or_default().to_string())
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for Recording {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    impl Recording {
        fn count(&self, ms: u64) -> usize {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|d| **d == Duration::from_millis(ms))
                .count()
        }
    }

    /// Pages shaped `{"items": [..], "num": n, "size": s, "count": c}`.
    struct Numbers;

    impl PagedResource for Numbers {
        type Item = u64;

        fn resource_id(&self) -> String {
            "numbers".into()
        }

        fn page_request(&self, page: u32) -> PageRequest {
            PageRequest::new("http://test/numbers").param("pn", page)
        }

        fn parse_page(&self, body: Value) -> Result<PageBody<u64>, FetchError> {
            if body.get("done").is_some() {
                return Ok(PageBody::NoMoreData);
            }
            let raw = body
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| FetchError::MalformedPayload("no items".into()))?;
            let items: Vec<u64> = raw.iter().filter_map(Value::as_u64).collect();
            let progress = match (body.get("num"), body.get("size"), body.get("count")) {
                (Some(n), Some(s), Some(c)) => Some(PageProgress {
                    num: n.as_u64().unwrap_or(0),
                    size: s.as_u64().unwrap_or(0),
                    count: c.as_u64().unwrap_or(0),
                }),
                _ => None,
            };
            Ok(PageBody::Items {
                skipped: raw.len() - items.len(),
                items,
                progress,
            })
        }
    }

    fn policy() -> FetchPolicy {
        FetchPolicy {
            max_items: 10_000,
            failure_threshold: 3,
            page_delay: DelayRange::from_millis(1, 1),
            backoff: DelayRange::from_millis(10, 10),
            rate_limit_backoff: DelayRange::from_millis(20, 20),
            breather_every: 0,
            breather: DelayRange::from_millis(5, 5),
            single_shot_delay: DelayRange::from_millis(3, 3),
        }
    }

    fn pacer(recording: &Arc<Recording>) -> Pacer {
        Pacer::new(Some(1), vec!["ua".into()], recording.clone())
    }

    fn page(items: Value, num: u64, size: u64, count: u64) -> Result<Value, FetchError> {
        Ok(json!({"items": items, "num": num, "size": size, "count": count}))
    }

    fn transient() -> Result<Value, FetchError> {
        Err(FetchError::TransientNetwork("timeout".into()))
    }

    #[tokio::test]
    async fn test_stops_when_pages_cover_count() {
        let transport = ScriptedTransport::new(vec![
            page(json!([1, 2]), 1, 2, 3),
            page(json!([3]), 2, 2, 3),
            page(json!([99]), 3, 2, 3),
        ]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(outcome.items, vec![1, 2, 3]);
        assert_eq!(outcome.report.status, FetchStatus::Completed);
        assert_eq!(outcome.report.pages, 2);
        assert_eq!(transport.pages_requested(), vec!["1", "2"]);
        assert_eq!(outcome.state.accumulated_count, 3);
    }

    #[tokio::test]
    async fn test_no_more_data_on_first_page() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"done": true}))]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert!(outcome.items.is_empty());
        assert_eq!(outcome.report.status, FetchStatus::Completed);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausts_after_threshold_failures() {
        let transport = ScriptedTransport::new(vec![transient(), transient(), transient(), page(json!([1]), 1, 1, 1)]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(outcome.report.status, FetchStatus::Exhausted);
        assert_eq!(transport.request_count(), 3);
        assert_eq!(outcome.report.attempts, 3);
        assert!(outcome.items.is_empty());
        // Page delay before each request, backoff only between attempts.
        assert_eq!(recording.count(1), 3);
        assert_eq!(recording.count(10), 2);
        assert!(outcome.report.last_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_valid_page_resets_failure_counter() {
        let transport = ScriptedTransport::new(vec![
            transient(),
            Ok(json!("not an object")),
            page(json!([1]), 1, 1, 3),
            transient(),
            transient(),
            page(json!([2]), 2, 1, 3),
            page(json!([3]), 3, 1, 3),
        ]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(outcome.items, vec![1, 2, 3]);
        assert_eq!(outcome.report.status, FetchStatus::Completed);
        assert_eq!(outcome.report.attempts, 7);
        assert_eq!(transport.pages_requested(), vec!["1", "1", "1", "2", "2", "2", "3"]);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_partial_items() {
        let transport = ScriptedTransport::new(vec![
            page(json!([1, 2]), 1, 2, 10),
            transient(),
            transient(),
            transient(),
        ]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(outcome.items, vec![1, 2]);
        assert_eq!(outcome.report.status, FetchStatus::Exhausted);
        assert_eq!(outcome.state.page_cursor, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_uses_longer_backoff() {
        let transport = ScriptedTransport::new(vec![
            Err(FetchError::RateLimited("-412".into())),
            page(json!([1]), 1, 1, 1),
        ]);
        let recording = Arc::new(Recording::default());
        PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(recording.count(20), 1);
        assert_eq!(recording.count(10), 0);
    }

    #[tokio::test]
    async fn test_empty_comment_response_is_retried() {
        let id = crate::types::ContentId::parse("BV1xx411c7mQ").unwrap();
        let resource = crate::api::CommentResource::new("http://test", id, 1, 20);
        let transport = ScriptedTransport::new(vec![
            Ok(json!({})),
            Ok(json!({
                "code": 0,
                "data": {
                    "page": {"num": 1, "size": 20, "count": 1},
                    "replies": [{"content": {"message": "real"}}]
                }
            })),
        ]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&resource, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(outcome.report.status, FetchStatus::Completed);
        assert_eq!(outcome.report.attempts, 2);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(recording.count(10), 1);
    }

    #[tokio::test]
    async fn test_capability_loss_surfaces() {
        let transport = ScriptedTransport::new(vec![Err(FetchError::CapabilityLost("client gone".into()))]);
        let recording = Arc::new(Recording::default());
        let result = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await;

        assert!(matches!(result, Err(HarvestError::CapabilityLost(_))));
    }

    #[tokio::test]
    async fn test_item_cap_stops_early() {
        let transport = ScriptedTransport::new(vec![
            page(json!([1, 2, 3]), 1, 3, 100),
            page(json!([4, 5, 6]), 2, 3, 100),
            page(json!([7, 8, 9]), 3, 3, 100),
        ]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(
            &transport,
            FetchPolicy {
                max_items: 5,
                ..policy()
            },
        )
        .run(&Numbers, &mut pacer(&recording))
        .await
        .unwrap();

        assert_eq!(outcome.items, vec![1, 2, 3, 4, 5]);
        assert_eq!(transport.request_count(), 2);
        assert_eq!(outcome.report.status, FetchStatus::Completed);
    }

    #[tokio::test]
    async fn test_zero_cap_issues_no_requests() {
        let transport = ScriptedTransport::new(vec![page(json!([1]), 1, 1, 1)]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(
            &transport,
            FetchPolicy {
                max_items: 0,
                ..policy()
            },
        )
        .run(&Numbers, &mut pacer(&recording))
        .await
        .unwrap();

        assert!(outcome.items.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_skipped_items_and_missing_progress() {
        let transport = ScriptedTransport::new(vec![
            Ok(json!({"items": [1, "bad", 2, null]})),
            page(json!([3]), 2, 1, 9),
        ]);
        let recording = Arc::new(Recording::default());
        let outcome = PagedFetcher::new(&transport, policy())
            .run(&Numbers, &mut pacer(&recording))
            .await
            .unwrap();

        assert_eq!(outcome.items, vec![1, 2]);
        assert_eq!(outcome.report.skipped, 2);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_breather_every_n_items() {
        let transport = ScriptedTransport::new(vec![page(json!([1, 2, 3, 4, 5]), 1, 5, 5)]);
        let recording = Arc::new(Recording::default());
        PagedFetcher::new(
            &transport,
            FetchPolicy {
                breather_every: 2,
                ..policy()
            },
        )
        .run(&Numbers, &mut pacer(&recording))
        .await
        .unwrap();

        assert_eq!(recording.count(5), 2);
    }

    #[tokio::test]
    async fn test_single_shot_soft_failure() {
        let transport = ScriptedTransport::new(vec![transient(), Ok(json!({"v": 4}))]);
        let recording = Arc::new(Recording::default());
        let mut pacer = pacer(&recording);
        let fetcher = PagedFetcher::new(&transport, policy());
        let request = PageRequest::new("http://test/one").param("pn", 0);

        let first = fetcher
            .fetch_json("one", &request, &mut pacer, |v| Ok(v["v"].as_u64()))
            .await
            .unwrap();
        assert_eq!(first, None);

        let second = fetcher
            .fetch_json("one", &request, &mut pacer, |v| Ok(v["v"].as_u64()))
            .await
            .unwrap();
        assert_eq!(second, Some(Some(4)));
        assert_eq!(recording.count(3), 2);
    }

    #[tokio::test]
    async fn test_single_shot_capability_loss() {
        let transport = ScriptedTransport::new(vec![Err(FetchError::CapabilityLost("gone".into()))]);
        let recording = Arc::new(Recording::default());
        let fetcher = PagedFetcher::new(&transport, policy());
        let request = PageRequest::new("http://test/one").param("pn", 0);
        let result = fetcher
            .fetch_text("one", &request, &mut pacer(&recording), Ok)
            .await;
        assert!(matches!(result, Err(HarvestError::CapabilityLost(_))));
    }

    #[test]
    fn test_progress_completion() {
        assert!(PageProgress { num: 2, size: 20, count: 40 }.is_complete());
        assert!(!PageProgress { num: 1, size: 20, count: 21 }.is_complete());
        assert!(PageProgress { num: 1, size: 20, count: 0 }.is_complete());
    }
}
