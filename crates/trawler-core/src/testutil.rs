//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::alert::AlertLevel;
use crate::config::RequestConfig;
use crate::error::AppError;
use crate::models::{PageReference, ScrapedItem};
use crate::request::RequestEngine;
use crate::spider::{Capabilities, CrawlSummary, Spider, SpiderContext, SpiderDescriptor};
use crate::traits::{AlertSink, HttpTransport, ItemStore, TransportRequest, TransportResponse};

/// Poll `condition` until it holds. Panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// `AppError` is not `Clone`; rebuild an equivalent value.
fn duplicate(error: &AppError) -> AppError {
    match error {
        AppError::HttpError(m) => AppError::HttpError(m.clone()),
        AppError::Timeout(s) => AppError::Timeout(*s),
        AppError::NetworkError(m) => AppError::NetworkError(m.clone()),
        AppError::ConfigError(m) => AppError::ConfigError(m.clone()),
        AppError::SpiderNotFound(m) => AppError::SpiderNotFound(m.clone()),
        AppError::StoreError(m) => AppError::StoreError(m.clone()),
        AppError::ParseError(m) => AppError::ParseError(m.clone()),
        AppError::Cancelled => AppError::Cancelled,
        other => AppError::Generic(other.to_string()),
    }
}

fn duplicate_result(
    result: &Result<TransportResponse, AppError>,
) -> Result<TransportResponse, AppError> {
    match result {
        Ok(response) => Ok(response.clone()),
        Err(e) => Err(duplicate(e)),
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

type Responder =
    Arc<dyn Fn(&TransportRequest<'_>) -> Result<TransportResponse, AppError> + Send + Sync>;

#[derive(Debug, Clone)]
struct RecordedCall {
    url: String,
    proxy: Option<String>,
    headers: Vec<(String, String)>,
}

/// Transport that replays scripted responses, then falls back to a responder.
#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Result<TransportResponse, AppError>>>>,
    fallback: Responder,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockTransport {
    fn with_fallback(fallback: Responder) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pops one scripted response per call; afterwards returns an empty page.
    pub fn with_responses(responses: Vec<Result<TransportResponse, AppError>>) -> Self {
        let transport = Self::with_fallback(Arc::new(|_: &TransportRequest<'_>| {
            Ok(TransportResponse::new(200, "<html></html>"))
        }));
        transport.script.lock().unwrap().extend(responses);
        transport
    }

    /// Returns the same response for every call.
    pub fn always(response: Result<TransportResponse, AppError>) -> Self {
        Self::with_fallback(Arc::new(move |_: &TransportRequest<'_>| {
            duplicate_result(&response)
        }))
    }

    /// Serves `url -> body` with status 200; anything else is a 404.
    pub fn routed(routes: HashMap<String, String>) -> Self {
        Self::with_fallback(Arc::new(move |request: &TransportRequest<'_>| {
            Ok(match routes.get(request.url) {
                Some(body) => TransportResponse::new(200, body.as_str()),
                None => TransportResponse::new(404, ""),
            })
        }))
    }

    /// Fails every request routed through `endpoint`, succeeds otherwise.
    pub fn failing_through(endpoint: &str) -> Self {
        let endpoint = endpoint.to_string();
        Self::with_fallback(Arc::new(move |request: &TransportRequest<'_>| {
            match request.proxy {
                Some(proxy) if proxy.endpoint == endpoint => {
                    Err(AppError::NetworkError("proxy connection refused".into()))
                }
                _ => Ok(TransportResponse::new(200, "ok")),
            }
        }))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.url.clone()).collect()
    }

    pub fn proxies_used(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.proxy.clone())
            .collect()
    }

    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|c| c.headers.clone())
            .unwrap_or_default()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse, AppError> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: request.url.to_string(),
            proxy: request.proxy.map(|p| p.endpoint.clone()),
            headers: request.headers.to_vec(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (self.fallback)(&request))
    }
}

/// Request engine over `transport` with no politeness delay.
pub fn test_engine(transport: MockTransport) -> Arc<RequestEngine> {
    let config = RequestConfig::default()
        .with_max_retries(2)
        .with_retry_delay(Duration::ZERO, false);
    Arc::new(RequestEngine::new(Arc::new(transport), config))
}

/// Context with an always-200 engine and the given store.
pub fn test_context(store: Option<Arc<dyn ItemStore>>) -> SpiderContext {
    let engine = test_engine(MockTransport::always(Ok(TransportResponse::new(200, "ok"))));
    let context = SpiderContext::new(engine);
    match store {
        Some(store) => context.with_store(store),
        None => context,
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum SinkMode {
    Healthy,
    Dead,
    Failing,
}

/// Alert sink that records every delivery.
pub struct MockSink {
    pub received: Arc<Mutex<Vec<(String, AlertLevel)>>>,
    mode: SinkMode,
}

impl MockSink {
    fn with_mode(mode: SinkMode) -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            mode,
        }
    }

    pub fn healthy() -> Self {
        Self::with_mode(SinkMode::Healthy)
    }

    /// Reports itself dead on the first delivery.
    pub fn dead() -> Self {
        Self::with_mode(SinkMode::Dead)
    }

    /// Errors on every delivery.
    pub fn failing() -> Self {
        Self::with_mode(SinkMode::Failing)
    }

    pub fn messages(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }
}

#[async_trait]
impl AlertSink for MockSink {
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<bool, AppError> {
        self.received
            .lock()
            .unwrap()
            .push((message.to_string(), level));
        match self.mode {
            SinkMode::Healthy => Ok(true),
            SinkMode::Dead => Ok(false),
            SinkMode::Failing => Err(AppError::Generic("sink exploded".into())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockSpider
// ---------------------------------------------------------------------------

enum SpiderMode {
    Batches(Vec<Vec<PageReference>>),
    /// The page stream never yields.
    Blocking,
    /// The page stream yields one error.
    Failing,
}

/// Increments a counter when dropped.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockSpider {
    descriptor: SpiderDescriptor,
    context: SpiderContext,
    mode: SpiderMode,
    by_url: HashMap<String, PageReference>,
    missing: Vec<String>,
    delays: HashMap<String, Duration>,
    fetched: Arc<Mutex<Vec<String>>>,
    runs: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl MockSpider {
    fn with_mode(name: &str, context: SpiderContext, mode: SpiderMode) -> Self {
        let by_url = match &mode {
            SpiderMode::Batches(batches) => batches
                .iter()
                .flatten()
                .map(|r| (r.url.clone(), r.clone()))
                .collect(),
            _ => HashMap::new(),
        };
        Self {
            descriptor: SpiderDescriptor::new(
                name,
                &format!("https://{name}.test/"),
                Capabilities::default(),
            )
            .unwrap(),
            context,
            mode,
            by_url,
            missing: Vec::new(),
            delays: HashMap::new(),
            fetched: Arc::new(Mutex::new(Vec::new())),
            runs: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Yields `batches`, then ends.
    pub fn with_batches(name: &str, context: SpiderContext, batches: Vec<Vec<PageReference>>) -> Self {
        Self::with_mode(name, context, SpiderMode::Batches(batches))
    }

    /// Runs until cancelled.
    pub fn blocking(name: &str, context: SpiderContext) -> Self {
        Self::with_mode(name, context, SpiderMode::Blocking)
    }

    /// Fails on the first batch.
    pub fn failing(name: &str, context: SpiderContext) -> Self {
        Self::with_mode(name, context, SpiderMode::Failing)
    }

    /// `get` returns `None` for `url`.
    pub fn with_missing(mut self, url: &str) -> Self {
        self.missing.push(url.to_string());
        self
    }

    pub fn with_item_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// URLs passed to `get`, in call order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Number of page streams opened, one per run.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of blocking page streams dropped before finishing.
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Spider for MockSpider {
    fn descriptor(&self) -> &SpiderDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &SpiderContext {
        &self.context
    }

    fn pages(&self, _start_page: Option<u32>) -> BoxStream<'_, Result<Vec<PageReference>, AppError>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            SpiderMode::Batches(batches) => stream::iter(batches.clone().into_iter().map(Ok)).boxed(),
            SpiderMode::Blocking => {
                let guard = DropCounter(Arc::clone(&self.cancelled));
                Box::pin(stream! {
                    let _guard = guard;
                    std::future::pending::<()>().await;
                    yield Ok::<_, AppError>(Vec::<PageReference>::new());
                })
            }
            SpiderMode::Failing => {
                stream::once(async { Err(AppError::ParseError("unreadable listing".into())) }).boxed()
            }
        }
    }

    async fn get(&self, url: &str) -> Option<ScrapedItem> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        if self.missing.iter().any(|m| m == url) {
            return None;
        }
        let reference = self
            .by_url
            .get(url)
            .cloned()
            .unwrap_or_else(|| PageReference::new(url, url, ""));
        Some(ScrapedItem::from_reference(reference))
    }
}

/// A spider whose run ignores cancellation.
pub struct StubbornSpider {
    descriptor: SpiderDescriptor,
    context: SpiderContext,
}

impl StubbornSpider {
    pub fn new(name: &str, context: SpiderContext) -> Self {
        Self {
            descriptor: SpiderDescriptor::new(
                name,
                &format!("https://{name}.test/"),
                Capabilities::default(),
            )
            .unwrap(),
            context,
        }
    }
}

#[async_trait]
impl Spider for StubbornSpider {
    fn descriptor(&self) -> &SpiderDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &SpiderContext {
        &self.context
    }

    fn pages(&self, _start_page: Option<u32>) -> BoxStream<'_, Result<Vec<PageReference>, AppError>> {
        stream::pending().boxed()
    }

    async fn get(&self, _url: &str) -> Option<ScrapedItem> {
        None
    }

    async fn run(
        &self,
        _start_page: Option<u32>,
        _cancel: &CancellationToken,
    ) -> Result<CrawlSummary, AppError> {
        std::future::pending().await
    }
}

/// A spider that keeps running for `linger` after cancellation, counting
/// live runs and the highest overlap seen.
pub struct LingeringSpider {
    descriptor: SpiderDescriptor,
    context: SpiderContext,
    linger: Duration,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl LingeringSpider {
    pub fn new(name: &str, context: SpiderContext, linger: Duration) -> Self {
        Self {
            descriptor: SpiderDescriptor::new(
                name,
                &format!("https://{name}.test/"),
                Capabilities::default(),
            )
            .unwrap(),
            context,
            linger,
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct LiveRun<'a>(&'a AtomicUsize);

impl Drop for LiveRun<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Spider for LingeringSpider {
    fn descriptor(&self) -> &SpiderDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &SpiderContext {
        &self.context
    }

    fn pages(&self, _start_page: Option<u32>) -> BoxStream<'_, Result<Vec<PageReference>, AppError>> {
        stream::pending().boxed()
    }

    async fn get(&self, _url: &str) -> Option<ScrapedItem> {
        None
    }

    async fn run(
        &self,
        _start_page: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary, AppError> {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _live = LiveRun(&self.live);

        cancel.cancelled().await;
        tokio::time::sleep(self.linger).await;
        Err(AppError::Cancelled)
    }
}
