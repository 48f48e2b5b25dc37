//! Async HTTP transport wrapping reqwest.
//!
//! One request per call: retry and backoff belong to the fetcher, so
//! failures are classified and returned rather than retried here. Protocol
//! errors are retried once over HTTP/1.1 because some CDNs reject HTTP/2.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use bili_engagement::{FetchError, Pairs, Transport};

/// HTTP transport for API and page requests.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for hosts that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose every request is bounded by `timeout_ms`.
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let timeout = Duration::from_millis(timeout_ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .deflate(true)
            .build()
            .context("failed to build HTTP client")?;

        let h1_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true)
            .deflate(true)
            .http1_only()
            .build()
            .context("failed to build HTTP/1.1 client")?;

        Ok(Self { client, h1_client })
    }

    async fn fetch(&self, url: &str, params: &Pairs, headers: &Pairs) -> Result<String, FetchError> {
        let response = match self.send(&self.client, url, params, headers).await {
            Ok(response) => response,
            Err(e) if looks_like_protocol_error(&e) => {
                debug!("retrying {url} over HTTP/1.1 after: {e}");
                self.send(&self.h1_client, url, params, headers)
                    .await
                    .map_err(|e| classify_send_error(url, &e))?
            }
            Err(e) => return Err(classify_send_error(url, &e)),
        };

        let status = response.status();
        if let Some(err) = classify_status(url, status) {
            return Err(err);
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::TransientNetwork(format!("{url}: failed to read body: {e}")))
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        url: &str,
        params: &Pairs,
        headers: &Pairs,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = client.get(url).query(params);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.send().await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str, params: &Pairs, headers: &Pairs) -> Result<Value, FetchError> {
        let body = self.fetch(url, params, headers).await?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::MalformedPayload(format!("{url}: invalid JSON: {e}")))
    }

    async fn get_text(&self, url: &str, params: &Pairs, headers: &Pairs) -> Result<String, FetchError> {
        self.fetch(url, params, headers).await
    }
}

fn looks_like_protocol_error(e: &reqwest::Error) -> bool {
    let err_str = format!("{e:?}");
    err_str.contains("http2") || err_str.contains("protocol") || err_str.contains("connection closed")
}

fn classify_send_error(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_builder() {
        // The request cannot be built at all; retrying will not help.
        FetchError::CapabilityLost(format!("{url}: {e}"))
    } else if e.is_timeout() {
        FetchError::TransientNetwork(format!("{url}: timed out"))
    } else {
        FetchError::TransientNetwork(format!("{url}: {e}"))
    }
}

fn classify_status(url: &str, status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{url}: HTTP {}", status.as_u16());
    Some(match status.as_u16() {
        412 | 429 => FetchError::RateLimited(detail),
        500..=599 => FetchError::TransientNetwork(detail),
        _ => FetchError::SourceUnavailable(detail),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("u", StatusCode::OK), None);
        assert!(matches!(
            classify_status("u", StatusCode::TOO_MANY_REQUESTS),
            Some(FetchError::RateLimited(_))
        ));
        assert!(matches!(
            classify_status("u", StatusCode::PRECONDITION_FAILED),
            Some(FetchError::RateLimited(_))
        ));
        assert!(matches!(
            classify_status("u", StatusCode::BAD_GATEWAY),
            Some(FetchError::TransientNetwork(_))
        ));
        assert!(matches!(
            classify_status("u", StatusCode::NOT_FOUND),
            Some(FetchError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unbuildable_request_is_capability_loss() {
        let transport = HttpTransport::new(1_000).unwrap();
        let err = transport.get_text("not a url", &[], &[]).await.unwrap_err();
        assert!(err.is_capability_loss(), "{err}");
    }
}
