//! Static spider registry and the loader that builds spiders from it.
//!
//! Compiled-in spiders register by type through [`RegisteredSpider`];
//! data-driven ones (for example sites read from a manifest file) register a
//! factory closure. [`load_spiders`] filters out unusable entries and builds
//! the rest with one shared [`SpiderContext`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::AppError;
use crate::spider::{Capabilities, Spider, SpiderContext};

/// A spider type that can be built from the shared context.
pub trait RegisteredSpider: Spider + Sized {
    const NAME: &'static str;
    const CAPABILITIES: Capabilities = Capabilities {
        anti_bot_protected: false,
        requires_browser: false,
    };

    fn build(context: SpiderContext) -> Result<Self, AppError>;
}

type Factory = Box<dyn Fn(&SpiderContext) -> Result<Arc<dyn Spider>, AppError> + Send + Sync>;

struct Entry {
    name: String,
    capabilities: Capabilities,
    factory: Factory,
}

/// Registry listing, as shown by `trawler list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryListing {
    pub name: String,
    pub capabilities: Capabilities,
}

#[derive(Default)]
pub struct SpiderRegistry {
    entries: Vec<Entry>,
}

impl SpiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: RegisteredSpider>(&mut self) -> &mut Self {
        self.register_factory(S::NAME, S::CAPABILITIES, |ctx| {
            Ok(Arc::new(S::build(ctx.clone())?) as Arc<dyn Spider>)
        })
    }

    /// Register a factory. A second entry with the same name replaces the first.
    pub fn register_factory<F>(
        &mut self,
        name: impl Into<String>,
        capabilities: Capabilities,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(&SpiderContext) -> Result<Arc<dyn Spider>, AppError> + Send + Sync + 'static,
    {
        let name = name.into();
        if let Some(pos) = self.entries.iter().position(|e| e.name == name) {
            tracing::warn!(spider = %name, "Spider registered twice, replacing the earlier entry");
            self.entries.remove(pos);
        }
        self.entries.push(Entry {
            name,
            capabilities,
            factory: Box::new(factory),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn listing(&self) -> Vec<RegistryListing> {
        self.entries
            .iter()
            .map(|e| RegistryListing {
                name: e.name.clone(),
                capabilities: e.capabilities,
            })
            .collect()
    }
}

impl fmt::Debug for SpiderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.name))
            .finish()
    }
}

/// Build every usable spider in `registry`.
///
/// Anti-bot protected and banned entries are skipped with a warning. An
/// empty registry, a failing build, or nothing left after filtering is a
/// configuration error.
pub fn load_spiders(
    registry: &SpiderRegistry,
    context: &SpiderContext,
    banned: &[String],
) -> Result<Vec<Arc<dyn Spider>>, AppError> {
    if registry.is_empty() {
        return Err(AppError::ConfigError("No spiders registered".into()));
    }
    if context.store.is_none() {
        tracing::warn!("No item store configured, spiders will refuse to run");
    }

    let mut spiders = Vec::with_capacity(registry.len());
    for entry in &registry.entries {
        if entry.capabilities.anti_bot_protected {
            tracing::warn!(spider = %entry.name, "Skipping spider behind anti-bot protection");
            continue;
        }
        if banned.iter().any(|b| b.eq_ignore_ascii_case(&entry.name)) {
            tracing::warn!(spider = %entry.name, "Skipping banned spider");
            continue;
        }

        let spider = (entry.factory)(context).map_err(|e| {
            AppError::ConfigError(format!("Failed to build spider '{}': {e}", entry.name))
        })?;
        tracing::debug!(spider = %entry.name, "Loaded spider");
        spiders.push(spider);
    }

    if spiders.is_empty() {
        return Err(AppError::ConfigError(
            "No spiders left after filtering".into(),
        ));
    }

    tracing::info!(count = spiders.len(), "Loaded spiders");
    Ok(spiders)
}
