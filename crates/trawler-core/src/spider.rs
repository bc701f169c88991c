//! The spider contract.
//!
//! A spider discovers item references in batches through [`Spider::pages`]
//! and fetches each item through [`Spider::get`]. The provided
//! [`Spider::run`] drives one full crawl: batches are drained one at a time,
//! items within a batch are fetched concurrently and persisted in completion
//! order, and items already known to the store are skipped.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::AppError;
use crate::models::{PageReference, ScrapedItem};
use crate::request::RequestEngine;
use crate::traits::{ItemStore, Stored};

/// Placeholder base URL that marks a spider nobody configured.
pub const UNCONFIGURED_BASE_URL: &str = "https://example-manga.com";

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// What a site needs or blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// The site sits behind an anti-bot wall; the loader skips it.
    #[serde(default)]
    pub anti_bot_protected: bool,
    #[serde(default)]
    pub requires_browser: bool,
}

/// Identity of a spider. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiderDescriptor {
    name: String,
    base_url: Url,
    capabilities: Capabilities,
}

impl SpiderDescriptor {
    /// Rejects empty names, unparsable URLs and the unconfigured placeholder.
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        capabilities: Capabilities,
    ) -> Result<Self, AppError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::ConfigError("Spider name must not be empty".into()));
        }
        if base_url.trim_end_matches('/') == UNCONFIGURED_BASE_URL {
            return Err(AppError::ConfigError(format!(
                "Spider '{name}' has no base URL configured"
            )));
        }
        let base_url = Url::parse(base_url).map_err(|e| {
            AppError::ConfigError(format!("Spider '{name}' has an invalid base URL: {e}"))
        })?;

        Ok(Self {
            name,
            base_url,
            capabilities,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Resolve a path against the base URL.
    pub fn join(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::ParseError(format!("Cannot join '{path}' onto {}: {e}", self.base_url)))
    }
}

/// Shared collaborators handed to every spider at construction.
#[derive(Clone)]
pub struct SpiderContext {
    pub http: Arc<RequestEngine>,
    pub store: Option<Arc<dyn ItemStore>>,
    pub batch_size: usize,
    /// Parser backend name, read by site parsers that support more than one.
    pub parser_hint: Option<String>,
}

impl SpiderContext {
    pub fn new(http: Arc<RequestEngine>) -> Self {
        Self {
            http,
            store: None,
            batch_size: DEFAULT_BATCH_SIZE,
            parser_hint: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_parser_hint(mut self, hint: impl Into<String>) -> Self {
        self.parser_hint = Some(hint.into());
        self
    }

    pub fn require_store(&self) -> Result<&Arc<dyn ItemStore>, AppError> {
        self.store
            .as_ref()
            .ok_or_else(|| AppError::ConfigError("No item store configured".into()))
    }
}

impl fmt::Debug for SpiderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiderContext")
            .field("http", &self.http)
            .field("store", &self.store.is_some())
            .field("batch_size", &self.batch_size)
            .field("parser_hint", &self.parser_hint)
            .finish()
    }
}

/// Counters for one completed crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub batches: usize,
    pub discovered: usize,
    /// Already known to the store, not fetched.
    pub skipped: usize,
    pub fetched: usize,
    pub added: usize,
    pub duplicates: usize,
    /// `get` returned nothing.
    pub failed: usize,
}

/// A site-specific crawl unit.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    fn descriptor(&self) -> &SpiderDescriptor;

    fn context(&self) -> &SpiderContext;

    fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// Identity of the implementing type, for lookups by type.
    fn kind(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    /// Lazily discovered batches of references, at most `batch_size` each.
    /// The stream may be infinite; the consumer pulls one batch at a time.
    fn pages(&self, start_page: Option<u32>) -> BoxStream<'_, Result<Vec<PageReference>, AppError>>;

    /// Fetch and parse one item. `None` means the item is skipped.
    async fn get(&self, url: &str) -> Option<ScrapedItem>;

    /// Human-readable progress.
    fn status(&self) -> String {
        "unknown".to_string()
    }

    /// Run one full crawl until the page stream ends, an error occurs, or
    /// `cancel` fires. Cancellation drops in-flight item fetches.
    async fn run(
        &self,
        start_page: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary, AppError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(spider = %self.name(), "Crawl cancelled");
                Err(AppError::Cancelled)
            }
            result = crawl(self, start_page) => result,
        }
    }
}

impl fmt::Debug for dyn Spider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spider")
            .field("name", &self.name())
            .field("base_url", &self.descriptor().base_url().as_str())
            .finish_non_exhaustive()
    }
}

/// The crawl loop behind [`Spider::run`], without cancellation.
pub async fn crawl<S: Spider + ?Sized>(
    spider: &S,
    start_page: Option<u32>,
) -> Result<CrawlSummary, AppError> {
    let store = Arc::clone(spider.context().require_store()?);
    let name = spider.name();
    let mut summary = CrawlSummary::default();

    tracing::info!(spider = %name, start_page = ?start_page, "Starting crawl");

    let mut pages = spider.pages(start_page);
    while let Some(batch) = pages.next().await {
        let batch = batch?;
        summary.batches += 1;
        summary.discovered += batch.len();

        let mut fetches = FuturesUnordered::new();
        for reference in batch {
            if store.exists(&reference.fingerprint()).await? {
                tracing::debug!(spider = %name, title = %reference.title, "Already known, skipping");
                summary.skipped += 1;
                continue;
            }
            fetches.push(async move {
                let item = spider.get(&reference.url).await;
                (reference, item)
            });
        }

        while let Some((reference, item)) = fetches.next().await {
            let Some(item) = item else {
                tracing::warn!(spider = %name, url = %reference.url, "Could not retrieve item");
                summary.failed += 1;
                continue;
            };
            summary.fetched += 1;
            match store.add_item(&item).await? {
                Stored::New(id) => {
                    tracing::info!(spider = %name, item_id = %id, title = %item.title, "Stored new item");
                    summary.added += 1;
                }
                Stored::Duplicate(id) => {
                    tracing::debug!(spider = %name, item_id = %id, title = %item.title, "Item already stored");
                    summary.duplicates += 1;
                }
            }
        }

        tracing::info!(
            spider = %name,
            batch = summary.batches,
            progress = %spider.status(),
            "Batch drained"
        );
    }

    tracing::info!(spider = %name, ?summary, "Crawl finished");
    Ok(summary)
}
