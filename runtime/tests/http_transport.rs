//! HTTP transport and HTTP-only pipeline tests against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bili_engagement::{
    BatchSummary, CollectingSink, FetchError, FetchStatus, HarvestConfig, HarvestEntry, Harvester,
    Transport,
};
use bili_harvest_runtime::http_client::HttpTransport;
use bili_harvest_runtime::renderer::HttpOnlyRenderer;

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn status_error(status: u16) -> FetchError {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/v2/reply"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(5_000).unwrap();
    transport
        .get_json(&format!("{}/x/v2/reply", server.uri()), &[], &[])
        .await
        .unwrap_err()
}

#[tokio::test]
async fn test_get_json_sends_params_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .and(query_param("bvid", "BV1xx411c7mD"))
        .and(header("Referer", "https://www.bilibili.com/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"aid": 2}})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(5_000).unwrap();
    let body = transport
        .get_json(
            &format!("{}/x/web-interface/view", server.uri()),
            &pairs(&[("bvid", "BV1xx411c7mD")]),
            &pairs(&[("Referer", "https://www.bilibili.com/")]),
        )
        .await
        .unwrap();
    assert_eq!(body["data"]["aid"], 2);
}

#[tokio::test]
async fn test_status_classification() {
    assert!(matches!(status_error(412).await, FetchError::RateLimited(_)));
    assert!(matches!(status_error(429).await, FetchError::RateLimited(_)));
    assert!(matches!(status_error(503).await, FetchError::TransientNetwork(_)));
    assert!(matches!(status_error(404).await, FetchError::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_invalid_json_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(5_000).unwrap();
    let err = transport.get_json(&server.uri(), &[], &[]).await.unwrap_err();
    assert!(matches!(err, FetchError::MalformedPayload(_)), "{err}");

    // The same body is fine as text.
    let text = transport.get_text(&server.uri(), &[], &[]).await.unwrap();
    assert_eq!(text, "<html>captcha</html>");
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(2_000)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(100).unwrap();
    let err = transport.get_text(&server.uri(), &[], &[]).await.unwrap_err();
    assert!(matches!(err, FetchError::TransientNetwork(_)), "{err}");
}

const PAGE: &str = r#"<html><head>
<script>window.__INITIAL_STATE__={"videoData":{"title":"A","stat":{"view":100,"reply":40}}};(function(){})();</script>
</head><body>
<div id="viewbox_report"><div class="video-info-meta"><div><div class="view item"><div>100</div></div></div></div></div>
<span class="share">5</span>
</body></html>"#;

/// Mount one video's page and endpoints. With `cookies`, the comment
/// endpoint only answers requests carrying that `Cookie` header.
async fn mount_video(server: &MockServer, cookies: Option<&str>) {
    Mock::given(method("GET"))
        .and(path("/video/BV1xx411c7mQ"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/view"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"aid": 1, "title": "A"}})),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/archive/stat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"view": 100, "reply": 40}})),
        )
        .mount(server)
        .await;
    let mut replies = Mock::given(method("GET"))
        .and(path("/x/v2/reply"))
        .and(query_param("oid", "1"))
        .and(query_param("pn", "1"));
    if let Some(cookies) = cookies {
        replies = replies.and(header("Cookie", cookies));
    }
    replies
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {
            "page": {"num": 1, "size": 20, "count": 1},
            "replies": [{"content": {"message": "nice"}, "member": {"uname": "alice"}}]
        }})))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/player/pagelist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": [{"cid": 99}]})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/v1/dm/list.so"))
        .and(query_param("oid", "99"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"<i><d p="1">hello</d></i>"#))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_http_only_pipeline() {
    let server = MockServer::start().await;
    mount_video(&server, None).await;

    let config = HarvestConfig {
        api_base: server.uri(),
        video_base: format!("{}/video/", server.uri()),
        seed: Some(3),
        ..HarvestConfig::default()
    }
    .without_delays();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(5_000).unwrap());
    let renderer = Arc::new(HttpOnlyRenderer::new(transport.clone()));
    let mut harvester = Harvester::new(config, transport, renderer);

    let mut sink = CollectingSink::default();
    let summary = harvester
        .harvest_batch(&["BV1xx411c7mQ".to_string()], &mut sink)
        .await
        .unwrap();
    assert_eq!(summary, BatchSummary { harvested: 1, failed: 0 });

    let HarvestEntry::Harvested(record) = &sink.entries[0] else {
        panic!("expected a harvested entry");
    };
    assert_eq!(record.video.title, "A");
    assert_eq!(record.video.play_count, 100);
    // No isolated subtree without a browser; the embedded state supplies it.
    assert_eq!(record.video.comment_count, 40);
    assert_eq!(record.video.share_count, 5);
    assert_eq!(record.comments.len(), 1);
    assert_eq!(record.comments[0].author, "alice");
    assert_eq!(record.comment_fetch.status, FetchStatus::Completed);
    assert_eq!(record.captions.len(), 1);
    assert_eq!(record.captions[0].text, "hello");
}

#[tokio::test]
async fn test_session_cookies_sent_with_comment_requests() {
    let cookies = "SESSDATA=abc%2C123; bili_jct=def; buvid3=ghi";
    let server = MockServer::start().await;
    mount_video(&server, Some(cookies)).await;

    let config = HarvestConfig {
        api_base: server.uri(),
        video_base: format!("{}/video/", server.uri()),
        seed: Some(3),
        cookies: Some(cookies.to_string()),
        ..HarvestConfig::default()
    }
    .without_delays();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(5_000).unwrap());
    let renderer = Arc::new(HttpOnlyRenderer::new(transport.clone()));
    let mut harvester = Harvester::new(config, transport, renderer);

    let mut sink = CollectingSink::default();
    harvester
        .harvest_batch(&["BV1xx411c7mQ".to_string()], &mut sink)
        .await
        .unwrap();

    let HarvestEntry::Harvested(record) = &sink.entries[0] else {
        panic!("expected a harvested entry");
    };
    assert_eq!(record.comments.len(), 1);
    assert_eq!(record.comment_fetch.status, FetchStatus::Completed);
}

#[tokio::test]
async fn test_missing_page_becomes_failed_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = HarvestConfig {
        api_base: server.uri(),
        video_base: format!("{}/video/", server.uri()),
        ..HarvestConfig::default()
    }
    .without_delays();
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(5_000).unwrap());
    let renderer = Arc::new(HttpOnlyRenderer::new(transport.clone()));
    let mut harvester = Harvester::new(config, transport, renderer);

    let mut sink = CollectingSink::default();
    let summary = harvester
        .harvest_batch(&["BV1xx411c7mQ".to_string()], &mut sink)
        .await
        .unwrap();
    assert_eq!(summary, BatchSummary { harvested: 0, failed: 1 });
    assert!(matches!(&sink.entries[0], HarvestEntry::Failed { id, .. } if id == "BV1xx411c7mQ"));
}
