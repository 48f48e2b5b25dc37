//! Jittered delays and request identity rotation.
//!
//! A single [`Pacer`] is owned by the orchestrator and lent to fetchers, so
//! the random source and the user-agent pool are explicit values rather than
//! process globals. Seeding it makes every delay and identity reproducible.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Inclusive delay range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ms: 0, max_ms: 0 };

    pub const fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn from_secs(min: u64, max: u64) -> Self {
        Self {
            min_ms: min * 1000,
            max_ms: max * 1000,
        }
    }
}

/// Suspends the current task. Swapped out in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Browser user agents rotated across requests.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const REFERER: &str = "https://www.bilibili.com/";

/// Pacing clock: jitter source, sleeper and identity pool.
pub struct Pacer {
    rng: StdRng,
    sleeper: Arc<dyn Sleeper>,
    user_agents: Vec<String>,
    cookies: Option<String>,
}

impl Pacer {
    /// Create a pacer. `seed` makes jitter and identity choice deterministic.
    pub fn new(seed: Option<u64>, user_agents: Vec<String>, sleeper: Arc<dyn Sleeper>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            sleeper,
            user_agents,
            cookies: None,
        }
    }

    /// Send `cookies` as the `Cookie` header on every request. Blank values
    /// are ignored.
    pub fn with_cookies(mut self, cookies: Option<String>) -> Self {
        self.cookies = cookies
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    /// Pick a delay uniformly from `range`.
    pub fn jitter(&mut self, range: DelayRange) -> Duration {
        let ms = if range.max_ms <= range.min_ms {
            range.min_ms
        } else {
            self.rng.gen_range(range.min_ms..=range.max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Sleep for a jittered delay drawn from `range` and return it.
    pub async fn pause(&mut self, range: DelayRange) -> Duration {
        let delay = self.jitter(range);
        if !delay.is_zero() {
            self.sleeper.sleep(delay).await;
        }
        delay
    }

    /// Request headers for the next call, with a rotated user agent and the
    /// session cookies when configured.
    pub fn identity_headers(&mut self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Referer".to_string(), REFERER.to_string()),
            (
                "Accept".to_string(),
                "application/json, text/plain, */*".to_string(),
            ),
            (
                "Accept-Language".to_string(),
                "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
            ),
        ];
        if let Some(ua) = self.user_agents.choose(&mut self.rng) {
            headers.push(("User-Agent".to_string(), ua.clone()));
        }
        if let Some(cookies) = &self.cookies {
            headers.push(("Cookie".to_string(), cookies.clone()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for Recording {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn agents() -> Vec<String> {
        DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jitter_within_range() {
        let mut pacer = Pacer::new(Some(7), agents(), Arc::new(TokioSleeper));
        let range = DelayRange::from_secs(10, 15);
        for _ in 0..200 {
            let d = pacer.jitter(range);
            assert!(d >= Duration::from_secs(10) && d <= Duration::from_secs(15));
        }
    }

    #[test]
    fn test_seeded_pacers_agree() {
        let mut a = Pacer::new(Some(42), agents(), Arc::new(TokioSleeper));
        let mut b = Pacer::new(Some(42), agents(), Arc::new(TokioSleeper));
        for _ in 0..20 {
            assert_eq!(a.jitter(DelayRange::from_secs(2, 5)), b.jitter(DelayRange::from_secs(2, 5)));
            assert_eq!(a.identity_headers(), b.identity_headers());
        }
    }

    #[test]
    fn test_degenerate_range() {
        let mut pacer = Pacer::new(Some(1), agents(), Arc::new(TokioSleeper));
        assert_eq!(pacer.jitter(DelayRange::ZERO), Duration::ZERO);
        assert_eq!(
            pacer.jitter(DelayRange::from_millis(500, 100)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_identity_headers_without_agents() {
        let mut pacer = Pacer::new(Some(1), Vec::new(), Arc::new(TokioSleeper));
        let headers = pacer.identity_headers();
        assert!(headers.iter().all(|(k, _)| k != "User-Agent"));
        assert!(headers.iter().any(|(k, v)| k == "Referer" && v == REFERER));
        assert!(headers.iter().all(|(k, _)| k != "Cookie"));
    }

    #[test]
    fn test_identity_headers_carry_cookies() {
        let cookies = "SESSDATA=abc; bili_jct=def; buvid3=ghi";
        let mut pacer =
            Pacer::new(Some(1), agents(), Arc::new(TokioSleeper)).with_cookies(Some(format!(" {cookies} ")));
        for _ in 0..3 {
            let headers = pacer.identity_headers();
            let sent: Vec<_> = headers.iter().filter(|(k, _)| k == "Cookie").collect();
            assert_eq!(sent, vec![&("Cookie".to_string(), cookies.to_string())]);
        }

        let mut blank = Pacer::new(Some(1), agents(), Arc::new(TokioSleeper)).with_cookies(Some("  ".into()));
        assert!(blank.identity_headers().iter().all(|(k, _)| k != "Cookie"));
    }

    #[tokio::test]
    async fn test_pause_skips_zero_sleep() {
        let recording = Arc::new(Recording::default());
        let mut pacer = Pacer::new(Some(3), agents(), recording.clone());
        pacer.pause(DelayRange::ZERO).await;
        let slept = pacer.pause(DelayRange::from_millis(5, 5)).await;
        assert_eq!(slept, Duration::from_millis(5));
        assert_eq!(*recording.0.lock().unwrap(), vec![Duration::from_millis(5)]);
    }
}
