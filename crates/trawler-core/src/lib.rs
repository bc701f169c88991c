pub mod alert;
pub mod config;
pub mod error;
pub mod models;
pub mod paginated;
pub mod proxy;
pub mod registry;
pub mod request;
pub mod spider;
pub mod starter;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use alert::{AlertLevel, AlertManager, TracingAlertSink};
pub use config::{CrawlConfig, RequestConfig};
pub use error::AppError;
pub use models::{PageReference, ScrapedItem, compute_hash, fingerprint};
pub use paginated::{PageLayout, PaginatedSpider, SiteParser};
pub use proxy::{ProxyPolicy, ProxyPool, ProxyRecord};
pub use registry::{RegisteredSpider, SpiderRegistry, load_spiders};
pub use request::{RequestEngine, RequestOptions, ResponseKind};
pub use spider::{Capabilities, CrawlSummary, Spider, SpiderContext, SpiderDescriptor};
pub use starter::{RunOutcome, RunState, SpiderRef, SpiderStarter, derive_status};
pub use status::{SpiderStatus, SpiderStatusKind};
pub use store::MemoryStore;
pub use supervisor::{ParsingReport, SpiderManager};
pub use traits::{AlertSink, HttpMethod, HttpTransport, ItemStore, Stored};
