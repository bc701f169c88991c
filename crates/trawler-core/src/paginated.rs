//! A spider for sites that list items on numbered pages.
//!
//! The page count is read once from the base URL. Listing pages are then
//! fetched in chunks of `batch_size`, each parsed into references, and item
//! pages are parsed on the blocking pool. Site-specific extraction lives in a
//! [`SiteParser`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::AppError;
use crate::models::{PageReference, ScrapedItem};
use crate::spider::{Spider, SpiderContext, SpiderDescriptor};

const PAGE_PLACEHOLDER: &str = "{page}";

/// Extracts data from one site's HTML.
///
/// Methods are synchronous; they are called from `spawn_blocking`.
pub trait SiteParser: Send + Sync + 'static {
    /// Highest page number advertised by the pagination widget.
    fn total_pages(&self, html: &str) -> Option<u32>;

    fn parse_page(&self, html: &str) -> Result<Vec<PageReference>, AppError>;

    fn parse_item(&self, url: &str, html: &str) -> Result<ScrapedItem, AppError>;
}

/// Where listing pages live on a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLayout {
    /// Relative URL with a `{page}` placeholder.
    #[serde(default = "default_page_template")]
    pub page_template: String,
    /// Page a crawl starts from when none is given.
    #[serde(default = "default_first_page")]
    pub first_page: u32,
}

fn default_page_template() -> String {
    "/page/{page}/".to_string()
}

fn default_first_page() -> u32 {
    2
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_template: default_page_template(),
            first_page: default_first_page(),
        }
    }
}

pub struct PaginatedSpider<P> {
    descriptor: SpiderDescriptor,
    context: SpiderContext,
    layout: PageLayout,
    parser: Arc<P>,
    total_pages: OnceCell<u32>,
    processed: AtomicU32,
}

impl<P: SiteParser> PaginatedSpider<P> {
    pub fn new(
        descriptor: SpiderDescriptor,
        context: SpiderContext,
        layout: PageLayout,
        parser: P,
    ) -> Result<Self, AppError> {
        if !layout.page_template.contains(PAGE_PLACEHOLDER) {
            return Err(AppError::ConfigError(format!(
                "Page template '{}' of spider '{}' has no {PAGE_PLACEHOLDER} placeholder",
                layout.page_template,
                descriptor.name()
            )));
        }
        Ok(Self {
            descriptor,
            context,
            layout,
            parser: Arc::new(parser),
            total_pages: OnceCell::new(),
            processed: AtomicU32::new(0),
        })
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn processed_pages(&self) -> u32 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn page_url(&self, page: u32) -> Result<String, AppError> {
        let path = self
            .layout
            .page_template
            .replace(PAGE_PLACEHOLDER, &page.to_string());
        Ok(self.descriptor.join(&path)?.to_string())
    }

    /// Page count, fetched once per spider. Falls back to 1.
    pub async fn total_pages(&self) -> u32 {
        *self
            .total_pages
            .get_or_init(|| async {
                let base = self.descriptor.base_url().as_str();
                let Some(html) = self.context.http.get_text(base).await else {
                    tracing::error!(spider = %self.descriptor.name(), url = %base, "Could not fetch the first page to read pagination");
                    return 1;
                };
                let parser = Arc::clone(&self.parser);
                match tokio::task::spawn_blocking(move || parser.total_pages(&html)).await {
                    Ok(Some(total)) if total > 0 => total,
                    Ok(_) => {
                        tracing::warn!(spider = %self.descriptor.name(), "No pagination found, assuming one page");
                        1
                    }
                    Err(e) => {
                        tracing::error!(spider = %self.descriptor.name(), error = %e, "Pagination parser panicked");
                        1
                    }
                }
            })
            .await
    }

    async fn parse_listing(&self, html: String) -> Result<Vec<PageReference>, AppError> {
        let parser = Arc::clone(&self.parser);
        tokio::task::spawn_blocking(move || parser.parse_page(&html))
            .await
            .map_err(|e| AppError::Generic(format!("Listing parser task failed: {e}")))?
    }
}

#[async_trait]
impl<P: SiteParser> Spider for PaginatedSpider<P> {
    fn descriptor(&self) -> &SpiderDescriptor {
        &self.descriptor
    }

    fn context(&self) -> &SpiderContext {
        &self.context
    }

    fn pages(&self, start_page: Option<u32>) -> BoxStream<'_, Result<Vec<PageReference>, AppError>> {
        let name = self.descriptor.name();
        let batch_size = self.context.batch_size.max(1);
        let start = start_page.unwrap_or(self.layout.first_page);

        Box::pin(stream! {
            self.processed.store(0, Ordering::Relaxed);
            let total = self.total_pages().await;
            tracing::info!(spider = %name, total, "Discovered pages");

            if start > total {
                tracing::info!(spider = %name, start, total, "Start page is past the last page, nothing to crawl");
                return;
            }

            let urls = match (start..=total)
                .map(|page| self.page_url(page))
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(urls) => urls,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for chunk in urls.chunks(batch_size) {
                let mut listings: FuturesUnordered<_> = chunk
                    .iter()
                    .map(|url| async move { (url, self.context.http.get_text(url).await) })
                    .collect();

                // Drain the whole chunk before yielding so no listing fetch
                // sits on a request permit while the consumer fetches items.
                let mut fetched = Vec::with_capacity(chunk.len());
                while let Some((url, html)) = listings.next().await {
                    let Some(html) = html else {
                        tracing::warn!(spider = %name, url = %url, "Listing page unavailable, skipping");
                        continue;
                    };
                    let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(spider = %name, processed, total, progress = %self.status(), "Processed listing page");
                    fetched.push(html);
                }
                drop(listings);

                for html in fetched {
                    match self.parse_listing(html).await {
                        Ok(references) => {
                            for batch in references.chunks(batch_size) {
                                yield Ok(batch.to_vec());
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn get(&self, url: &str) -> Option<ScrapedItem> {
        let Some(bytes) = self.context.http.get_bytes(url).await else {
            tracing::error!(spider = %self.descriptor.name(), url = %url, "Could not fetch item page");
            return None;
        };

        let parser = Arc::clone(&self.parser);
        let owned_url = url.to_string();
        let parsed = tokio::task::spawn_blocking(move || {
            let html = String::from_utf8_lossy(&bytes);
            parser.parse_item(&owned_url, &html)
        })
        .await;

        match parsed {
            Ok(Ok(item)) => Some(item),
            Ok(Err(e)) => {
                tracing::warn!(spider = %self.descriptor.name(), url = %url, error = %e, "Could not parse item page");
                None
            }
            Err(e) => {
                tracing::error!(spider = %self.descriptor.name(), url = %url, error = %e, "Item parser task failed");
                None
            }
        }
    }

    /// Percentage of listing pages processed, e.g. `"40%"`.
    fn status(&self) -> String {
        let total = self.total_pages.get().copied().unwrap_or(1).max(1);
        let percent = u64::from(self.processed_pages()) * 100 / u64::from(total);
        format!("{percent}%")
    }
}
