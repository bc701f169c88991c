//! JSON site manifest.
//!
//! Each entry describes a paginated site and its selectors, and becomes a
//! [`SpiderRegistry`] factory backed by [`PaginatedSpider`] + [`SelectorParser`].
//!
//! ```json
//! {
//!   "sites": [{
//!     "name": "gallery",
//!     "base_url": "https://gallery.test/",
//!     "layout": { "page_template": "/page/{page}/", "first_page": 2 },
//!     "capabilities": { "anti_bot_protected": false },
//!     "selectors": { "pagination": ".pagination a", "...": "..." }
//!   }]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use trawler_core::error::AppError;
use trawler_core::paginated::{PageLayout, PaginatedSpider};
use trawler_core::registry::SpiderRegistry;
use trawler_core::spider::{Capabilities, Spider, SpiderDescriptor};

use crate::parser::{ParseMode, SelectorParser, SelectorSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteEntry {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub layout: PageLayout,
    #[serde(default)]
    pub capabilities: Capabilities,
    pub selectors: SelectorSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteManifest {
    #[serde(default)]
    pub sites: Vec<SiteEntry>,
}

impl SiteManifest {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid site manifest: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read site manifest {}: {e}",
                path.display()
            ))
        })?;
        let manifest = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), sites = manifest.sites.len(), "Loaded site manifest");
        Ok(manifest)
    }

    /// Add one factory per site. Selectors and URLs are validated here, so a
    /// broken entry fails before any spider is built. The context's parser
    /// hint picks the parse mode when spiders are built.
    pub fn register_into(&self, registry: &mut SpiderRegistry) -> Result<(), AppError> {
        for site in &self.sites {
            let base_url = Url::parse(&site.base_url).map_err(|e| {
                AppError::ConfigError(format!(
                    "Site '{}' has an invalid base URL: {e}",
                    site.name
                ))
            })?;
            let parser = SelectorParser::new(base_url, &site.selectors).map_err(|e| {
                AppError::ConfigError(format!("Site '{}': {e}", site.name))
            })?;

            let entry = site.clone();
            registry.register_factory(&site.name, site.capabilities, move |ctx| {
                let descriptor =
                    SpiderDescriptor::new(&entry.name, &entry.base_url, entry.capabilities)?;
                let mode = ParseMode::from_hint(ctx.parser_hint.as_deref())?;
                let spider = PaginatedSpider::new(
                    descriptor,
                    ctx.clone(),
                    entry.layout.clone(),
                    parser.clone().with_mode(mode),
                )?;
                Ok(Arc::new(spider) as Arc<dyn Spider>)
            });
        }
        Ok(())
    }
}
