//! Chromium-based renderer using chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use bili_engagement::pacing::DEFAULT_USER_AGENTS;
use bili_engagement::{FetchError, PageRenderer, RenderedPage, ScriptExecutor};

use crate::config::BrowserSettings;

/// Environment variable naming an explicit Chromium binary.
pub const CHROMIUM_ENV: &str = "BILI_HARVEST_CHROMIUM_PATH";

const SCROLL_TO_COMMENTS_JS: &str = "window.scrollTo(0, document.body.scrollHeight); true";

/// Find the Chromium binary path.
pub fn find_chromium(configured: Option<&PathBuf>) -> Option<PathBuf> {
    // 1. explicit configuration
    if let Some(path) = configured.filter(|p| p.exists()) {
        return Some(path.clone());
    }

    // 2. BILI_HARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var(CHROMIUM_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.bili-harvest/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".bili-harvest/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".bili-harvest/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".bili-harvest/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".bili-harvest/chromium/chrome-linux64/chrome"),
                home.join(".bili-harvest/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Headless Chromium renderer. Each render opens a fresh tab that lives until
/// its script executor is closed.
pub struct ChromiumRenderer {
    browser: Browser,
    navigation_timeout: Duration,
    settle: Duration,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let chrome_path = find_chromium(settings.chromium_path.as_ref()).with_context(|| {
            format!("Chromium not found. Set browser.chromium_path or {CHROMIUM_ENV}.")
        })?;

        let user_agent = format!("--user-agent={}", DEFAULT_USER_AGENTS[0]);
        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--window-size=1920,1080")
            .arg(user_agent.as_str())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            navigation_timeout: Duration::from_millis(settings.navigation_timeout_ms),
            settle: Duration::from_millis(settings.settle_ms),
        })
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<(), FetchError> {
        let timeout_ms = self.navigation_timeout.as_millis();
        let load = async {
            page.goto(url).await?;
            if let Err(e) = page.wait_for_navigation().await {
                debug!("waiting for navigation on {url} failed: {e}");
            }
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(self.navigation_timeout, load).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(FetchError::SourceUnavailable(format!("navigation failed: {e}")));
            }
            Err(_) => {
                return Err(FetchError::SourceUnavailable(format!(
                    "navigation timed out after {timeout_ms}ms"
                )));
            }
        }

        // Comments mount lazily once the page is scrolled.
        tokio::time::sleep(self.settle).await;
        if let Err(e) = page.evaluate(SCROLL_TO_COMMENTS_JS).await {
            debug!("scroll failed on {url}: {e}");
        }
        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::CapabilityLost(format!("failed to open a tab: {e}")))?;

        let html = match self.navigate(&page, url).await {
            Ok(()) => page_html(&page).await,
            Err(e) => Err(e),
        };
        match html {
            Ok(html) => Ok(RenderedPage {
                html,
                script: Box::new(ChromiumScript { page }),
            }),
            Err(e) => {
                let _ = page.close().await;
                Err(e)
            }
        }
    }
}

async fn page_html(page: &Page) -> Result<String, FetchError> {
    page.evaluate("document.documentElement.outerHTML")
        .await
        .map_err(|e| FetchError::SourceUnavailable(format!("failed to read HTML: {e}")))?
        .into_value::<String>()
        .map_err(|e| FetchError::MalformedPayload(format!("failed to convert HTML result: {e:?}")))
}

/// Script capability of one live tab.
pub struct ChromiumScript {
    page: Page,
}

#[async_trait]
impl ScriptExecutor for ChromiumScript {
    async fn run(&self, snippet: &str) -> Result<Value, FetchError> {
        let result = self
            .page
            .evaluate(snippet)
            .await
            .map_err(|e| FetchError::SourceUnavailable(format!("JS execution failed: {e}")))?;
        // `null` and `undefined` come back without a value.
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn close(self: Box<Self>) {
        let _ = self.page.close().await;
    }
}
