//! Coordination of the whole spider set.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::alert::{AlertLevel, AlertManager};
use crate::config::CrawlConfig;
use crate::error::AppError;
use crate::registry::{SpiderRegistry, load_spiders};
use crate::spider::{Spider, SpiderContext};
use crate::starter::{RunState, SpiderRef, SpiderStarter};
use crate::status::SpiderStatus;
use crate::traits::ItemStore;

/// Result of one `start_full_parsing` pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsingReport {
    /// Every spider was already running; nothing was started.
    pub skipped: bool,
    /// Net growth of the store over the pass.
    pub new_items: u64,
    /// Final status of each spider started by this pass.
    pub statuses: Vec<SpiderStatus>,
}

pub struct SpiderManager {
    starter: Arc<SpiderStarter>,
    alerts: Arc<AlertManager>,
    store: Option<Arc<dyn ItemStore>>,
}

impl SpiderManager {
    pub fn new(starter: SpiderStarter, store: Option<Arc<dyn ItemStore>>) -> Self {
        let alerts = starter.alerts().cloned();
        let (starter, alerts) = match alerts {
            Some(alerts) => (starter, alerts),
            None => {
                let alerts = Arc::new(AlertManager::new());
                (starter.with_alerts(Arc::clone(&alerts)), alerts)
            }
        };
        Self {
            starter: Arc::new(starter),
            alerts,
            store,
        }
    }

    /// Load spiders from `registry` and wire them to one starter.
    pub fn from_registry(
        registry: &SpiderRegistry,
        context: &SpiderContext,
        config: &CrawlConfig,
        alerts: Arc<AlertManager>,
    ) -> Result<Self, AppError> {
        let spiders = load_spiders(registry, context, &config.banned_spiders)?;
        let starter = SpiderStarter::new(spiders)
            .with_alerts(alerts)
            .with_grace(config.stop_grace);
        Ok(Self::new(starter, context.store.clone()))
    }

    pub fn starter(&self) -> &Arc<SpiderStarter> {
        &self.starter
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn spiders(&self) -> &[Arc<dyn Spider>] {
        self.starter.spiders()
    }

    /// Run every idle spider once, then stop everything.
    pub async fn start_full_parsing(&self) -> Result<ParsingReport, AppError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| AppError::ConfigError("No item store configured".into()))?;

        let idle: Vec<&Arc<dyn Spider>> = self
            .spiders()
            .iter()
            .filter(|s| {
                !matches!(
                    self.starter.state(*s),
                    Ok(RunState::Running { .. })
                )
            })
            .collect();

        if idle.is_empty() {
            tracing::info!("All spiders are already running, skipping");
            self.alerts
                .broadcast("All spiders are already running, skipping", AlertLevel::Info)
                .await;
            return Ok(ParsingReport {
                skipped: true,
                new_items: 0,
                statuses: self.status(),
            });
        }

        let before = store.total_count().await?;
        tracing::info!(spiders = idle.len(), items_before = before, "Starting full parsing");

        let results = join_all(idle.iter().map(|s| self.starter.start(*s, None))).await;
        let mut statuses = Vec::with_capacity(results.len());
        for (spider, result) in idle.iter().zip(results) {
            match result {
                Ok(status) => statuses.push(status),
                Err(e) => tracing::error!(spider = %spider.name(), error = %e, "Spider could not be started"),
            }
        }

        self.stop_all_spider().await;

        let after = store.total_count().await?;
        let new_items = after.saturating_sub(before);
        tracing::info!(new_items, items_after = after, "Full parsing finished");
        if after != before {
            self.alerts
                .broadcast(&format!("{new_items} new items"), AlertLevel::Info)
                .await;
        }

        Ok(ParsingReport {
            skipped: false,
            new_items,
            statuses,
        })
    }

    /// Stop every spider. Individual failures are logged, never returned.
    pub async fn stop_all_spider(&self) -> Vec<SpiderStatus> {
        let results = join_all(self.spiders().iter().map(|s| self.starter.stop(s))).await;
        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to stop spider");
                    None
                }
            })
            .collect()
    }

    /// One fresh status per managed spider.
    pub fn status(&self) -> Vec<SpiderStatus> {
        self.spiders()
            .iter()
            .map(|s| self.starter.status_of(&**s))
            .collect()
    }

    pub fn spider_status<'a>(&self, spider: impl Into<SpiderRef<'a>>) -> Result<SpiderStatus, AppError> {
        self.starter.status(spider)
    }
}
