//! Fetch layer against a mock server

use listing_harvester::fetch::{
    FetchRequest, FetchSettings, Fetcher, ReqwestTransport, StaticProxies,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Nothing listens on port 1, so every proxied attempt is refused
const DEAD_PROXY: &str = "127.0.0.1:1";

fn fetcher(use_proxy: bool, proxies: &[&str]) -> Fetcher {
    let transport = ReqwestTransport::new("TestAgent/1.0", Duration::from_secs(5)).unwrap();
    Fetcher::new(
        Arc::new(transport),
        Box::new(StaticProxies::parse(proxies).unwrap()),
        FetchSettings {
            use_proxy,
            max_attempts: 2,
            sleep: Duration::ZERO,
        },
    )
}

#[tokio::test]
async fn test_direct_get() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/listing"))
        .and(header("user-agent", "TestAgent/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = fetcher(false, &[])
        .fetch(FetchRequest::get(format!("{}/listing", mock_server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "<html></html>");
}

#[tokio::test]
async fn test_dead_proxies_fall_back_to_direct() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/phone"))
        .and(body_string("postingId=42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"phone\":\"351\"}"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = fetcher(true, &[DEAD_PROXY]);
    let response = fetcher
        .fetch(FetchRequest::post(
            format!("{}/phone", mock_server.uri()),
            "postingId=42",
        ))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let stats = fetcher.stats();
    assert_eq!(stats.proxied_attempts, 2);
    assert_eq!(stats.proxy_failures, 2);
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.direct_requests, 1);
}

#[tokio::test]
async fn test_direct_post_error_status_is_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/phone"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = fetcher(false, &[])
        .fetch(FetchRequest::post(format!("{}/phone", mock_server.uri()), "id=1"))
        .await
        .unwrap();

    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn test_unreachable_host_is_a_failure_not_a_panic() {
    let result = fetcher(false, &[])
        .fetch(FetchRequest::get(format!("http://{}/nothing", DEAD_PROXY)))
        .await;

    assert!(result.is_err());
}
