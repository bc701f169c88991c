//! Shared request engine: retries, proxy rotation, rate limiting and a
//! short-lived response cache.
//!
//! One engine is shared by every spider, so its concurrency gate bounds the
//! aggregate number of in-flight requests across the whole crawl.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trawler_core::config::RequestConfig;
//! use trawler_core::request::RequestEngine;
//! # use trawler_core::traits::{HttpTransport, TransportRequest, TransportResponse};
//! # struct MyTransport;
//! # #[async_trait::async_trait]
//! # impl HttpTransport for MyTransport {
//! #     async fn send(&self, _: TransportRequest<'_>) -> Result<TransportResponse, trawler_core::AppError> { todo!() }
//! # }
//!
//! # async fn run() {
//! let config = RequestConfig::default()
//!     .with_max_concurrent_requests(4)
//!     .with_retry_delay(Duration::from_millis(500), true);
//! let engine = RequestEngine::new(Arc::new(MyTransport), config);
//! let html = engine.get_text("https://example.com/page/2/").await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use tokio::sync::Semaphore;

use crate::config::RequestConfig;
use crate::proxy::{ProxyPool, ProxySlot};
use crate::traits::{HttpMethod, HttpTransport, TransportRequest};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-GB,en;q=0.8", "en;q=0.7,*;q=0.5"];

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Text,
    Bytes,
}

/// A response body in the requested shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Bytes(Vec<u8>),
}

impl Body {
    fn from_raw(raw: &[u8], kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Text => Body::Text(String::from_utf8_lossy(raw).into_owned()),
            ResponseKind::Bytes => Body::Bytes(raw.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Body::Text(s) => s.len(),
            Body::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_text(self) -> String {
        match self {
            Body::Text(s) => s,
            Body::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Body::Text(s) => s.into_bytes(),
            Body::Bytes(b) => b,
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Per-attempt timeout; falls back to the engine default.
    pub timeout: Option<Duration>,
    /// Fixed headers instead of a randomized set.
    pub headers: Option<Vec<(String, String)>>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = Some(headers);
        self
    }
}

type CacheKey = (HttpMethod, String);

enum Attempt {
    Done(Arc<[u8]>),
    /// 404 / 403: the page is gone or blocked for us.
    Gone,
    Retry,
    Fatal,
}

/// HTTP request engine with retry, proxy rotation and caching.
pub struct RequestEngine {
    transport: Arc<dyn HttpTransport>,
    config: RequestConfig,
    gate: Semaphore,
    cache: Cache<CacheKey, Arc<[u8]>>,
    proxies: ProxyPool,
}

impl RequestEngine {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RequestConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        let proxies = ProxyPool::new(config.proxies.clone(), config.proxy_policy);
        let gate = Semaphore::new(config.max_concurrent_requests.max(1));

        Self {
            transport,
            config,
            gate,
            cache,
            proxies,
        }
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    /// Number of requests currently holding the concurrency gate.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_requests.max(1) - self.gate.available_permits()
    }

    pub fn cache_len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending cache evictions and expirations.
    pub async fn sync_cache(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub async fn get_text(&self, url: &str) -> Option<String> {
        self.request(HttpMethod::Get, url, ResponseKind::Text)
            .await
            .map(Body::into_text)
    }

    pub async fn get_bytes(&self, url: &str) -> Option<Vec<u8>> {
        self.request(HttpMethod::Get, url, ResponseKind::Bytes)
            .await
            .map(Body::into_bytes)
    }

    pub async fn post(&self, url: &str, kind: ResponseKind) -> Option<Body> {
        self.request(HttpMethod::Post, url, kind).await
    }

    pub async fn request(&self, method: HttpMethod, url: &str, kind: ResponseKind) -> Option<Body> {
        self.request_with(method, url, kind, RequestOptions::default())
            .await
    }

    /// Perform a request with retries. `None` means the page could not be
    /// retrieved (gone, blocked, or retries exhausted); the cause is logged.
    pub async fn request_with(
        &self,
        method: HttpMethod,
        url: &str,
        kind: ResponseKind,
        options: RequestOptions,
    ) -> Option<Body> {
        let key: CacheKey = (method, url.to_string());
        if let Some(raw) = self.cache.get(&key).await {
            tracing::info!(%method, %url, "Using cached response");
            return Some(Body::from_raw(&raw, kind));
        }

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(error = %e, "Request gate closed");
                return None;
            }
        };

        tracing::info!(%method, %url, "Fetching page");
        let timeout = options.timeout.unwrap_or(self.config.timeout);

        for attempt in 1..=self.config.max_retries {
            let outcome = self.attempt(method, url, &options, timeout, attempt).await;
            self.pause().await;

            match outcome {
                Attempt::Done(raw) => {
                    tracing::info!(%method, %url, len = raw.len(), "Fetched page");
                    let body = Body::from_raw(&raw, kind);
                    self.cache.insert(key, raw).await;
                    return Some(body);
                }
                Attempt::Gone | Attempt::Fatal => return None,
                Attempt::Retry => {}
            }
        }

        tracing::error!(
            %method,
            %url,
            max_retries = self.config.max_retries,
            "Failed to fetch page after {} attempts",
            self.config.max_retries
        );
        None
    }

    async fn attempt(
        &self,
        method: HttpMethod,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
        attempt: u32,
    ) -> Attempt {
        let headers = options.headers.clone().unwrap_or_else(random_headers);
        let selected = self.proxies.select();
        let request = TransportRequest {
            method,
            url,
            headers: &headers,
            proxy: selected.map(|(_, record)| record),
            timeout,
        };
        let slot = selected.map(|(slot, _)| slot);

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => {
                self.proxy_success(slot);
                Attempt::Done(response.body.into())
            }
            Ok(response) if response.status == 404 => {
                tracing::warn!(%method, %url, "Page does not exist");
                Attempt::Gone
            }
            Ok(response) if response.status == 403 => {
                self.proxy_failure(slot);
                tracing::warn!(%method, %url, "Page is forbidden");
                Attempt::Gone
            }
            Ok(response) => {
                self.proxy_failure(slot);
                tracing::error!(%method, %url, status = response.status, attempt, "Unexpected status, retrying");
                Attempt::Retry
            }
            Err(e) if e.is_retryable() => {
                self.proxy_failure(slot);
                tracing::error!(%method, %url, error = %e, attempt, "Transient failure, retrying");
                Attempt::Retry
            }
            Err(e) => {
                self.proxy_failure(slot);
                tracing::error!(%method, %url, error = %e, "Request failed");
                Attempt::Fatal
            }
        }
    }

    async fn pause(&self) {
        let delay = self.config.effective_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn proxy_success(&self, slot: Option<ProxySlot>) {
        if let Some(slot) = slot {
            self.proxies.record_success(slot);
        }
    }

    fn proxy_failure(&self, slot: Option<ProxySlot>) {
        if let Some(slot) = slot {
            self.proxies.record_failure(slot);
        }
    }
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("config", &self.config)
            .field("proxies", &self.proxies.len())
            .finish_non_exhaustive()
    }
}

/// A browser-like header set, varied per attempt.
pub fn random_headers() -> Vec<(String, String)> {
    let agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
    let language = ACCEPT_LANGUAGES[fastrand::usize(..ACCEPT_LANGUAGES.len())];
    vec![
        ("User-Agent".to_string(), agent.to_string()),
        (
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language".to_string(), language.to_string()),
    ]
}
