use std::sync::Arc;
use std::time::Duration;

use trawler_client::ReqwestTransport;
use trawler_core::config::RequestConfig;
use trawler_core::request::{RequestEngine, RequestOptions, ResponseKind};
use trawler_core::traits::HttpMethod;

use crate::integration::common::{Reply, TestServer};

fn engine(max_retries: u32) -> RequestEngine {
    let config = RequestConfig::default()
        .with_max_retries(max_retries)
        .with_retry_delay(Duration::ZERO, false)
        .with_timeout(Duration::from_millis(300));
    RequestEngine::new(Arc::new(ReqwestTransport::new().unwrap()), config)
}

#[tokio::test]
async fn fetches_text_from_live_server() {
    let server = TestServer::start().await;
    server.route("/page/2/", vec![Reply::ok("<p>hello</p>")]);

    let body = engine(3).get_text(&server.url("/page/2/")).await;

    assert_eq!(body.as_deref(), Some("<p>hello</p>"));
    assert_eq!(server.hits("/page/2/"), 1);
}

#[tokio::test]
async fn not_found_is_attempted_once() {
    let server = TestServer::start().await;

    let body = engine(3).get_text(&server.url("/missing")).await;

    assert!(body.is_none());
    assert_eq!(server.hits("/missing"), 1);
}

#[tokio::test]
async fn forbidden_is_attempted_once() {
    let server = TestServer::start().await;
    server.route("/blocked", vec![Reply::status(403)]);

    let body = engine(3).get_text(&server.url("/blocked")).await;

    assert!(body.is_none());
    assert_eq!(server.hits("/blocked"), 1);
}

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let server = TestServer::start().await;
    server.route(
        "/flaky",
        vec![Reply::status(500), Reply::status(502), Reply::ok("ok")],
    );

    let body = engine(3).get_text(&server.url("/flaky")).await;

    assert_eq!(body.as_deref(), Some("ok"));
    assert_eq!(server.hits("/flaky"), 3);
}

#[tokio::test]
async fn slow_server_times_out_on_every_attempt() {
    let server = TestServer::start().await;
    server.route(
        "/slow",
        vec![Reply::ok("late").delayed(Duration::from_secs(2))],
    );

    let body = engine(2).get_text(&server.url("/slow")).await;

    assert!(body.is_none());
    assert_eq!(server.hits("/slow"), 2);
}

#[tokio::test]
async fn refused_connection_exhausts_retries() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let body = engine(2).get_text(&format!("http://{addr}/")).await;

    assert!(body.is_none());
}

#[tokio::test]
async fn sends_browser_headers_and_custom_overrides() {
    let server = TestServer::start().await;
    server.route("/a", vec![Reply::ok("a")]);
    server.route("/b", vec![Reply::ok("b")]);
    let engine = engine(1);

    engine.get_text(&server.url("/a")).await;
    engine
        .request_with(
            HttpMethod::Post,
            &server.url("/b"),
            ResponseKind::Bytes,
            RequestOptions::default()
                .with_headers(vec![("X-Trace".to_string(), "abc".to_string())]),
        )
        .await;

    let requests = server.requests();
    let first = requests.iter().find(|r| r.starts_with("GET /a")).unwrap().to_lowercase();
    let second = requests.iter().find(|r| r.starts_with("POST /b")).unwrap().to_lowercase();
    assert!(first.contains("user-agent: mozilla/5.0"));
    assert!(first.contains("accept-language:"));
    assert!(second.contains("x-trace: abc"));
}

#[tokio::test]
async fn repeated_fetch_is_served_from_cache() {
    let server = TestServer::start().await;
    server.route("/cached", vec![Reply::ok("one")]);
    let engine = engine(1);

    let first = engine.get_text(&server.url("/cached")).await;
    let second = engine.get_text(&server.url("/cached")).await;

    assert_eq!(first, second);
    assert_eq!(server.hits("/cached"), 1);
}
