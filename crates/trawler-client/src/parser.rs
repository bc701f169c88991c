//! CSS-selector implementation of [`SiteParser`].
//!
//! Selectors are compiled once when the parser is built; invalid CSS is a
//! configuration error rather than a crawl-time failure.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use trawler_core::error::AppError;
use trawler_core::models::{PageReference, ScrapedItem};
use trawler_core::paginated::SiteParser;

/// CSS selectors describing one site's markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    /// Pagination links; the largest numeric text is the page count.
    pub pagination: String,
    /// One element per item on a listing page.
    pub listing_item: String,
    /// Title, relative to a listing item. Falls back to the link's `title` attribute.
    pub listing_title: String,
    /// Link to the detail page, relative to a listing item.
    pub listing_link: String,
    /// Thumbnail image, relative to a listing item.
    #[serde(default)]
    pub listing_poster: Option<String>,

    /// Title on the detail page.
    pub title: String,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Gallery images on the detail page, in page order.
    #[serde(default)]
    pub gallery: Option<String>,
}

#[derive(Debug, Clone)]
struct Compiled {
    pagination: Selector,
    listing_item: Selector,
    listing_title: Selector,
    listing_link: Selector,
    listing_poster: Option<Selector>,
    title: Selector,
    poster: Option<Selector>,
    tags: Option<Selector>,
    author: Option<Selector>,
    language: Option<Selector>,
    gallery: Option<Selector>,
}

fn compile(field: &str, css: &str) -> Result<Selector, AppError> {
    Selector::parse(css)
        .map_err(|e| AppError::ConfigError(format!("Invalid '{field}' selector '{css}': {e}")))
}

fn compile_opt(field: &str, css: Option<&String>) -> Result<Option<Selector>, AppError> {
    css.map(|css| compile(field, css)).transpose()
}

/// How raw markup is turned into a tree before selectors run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Full document: missing `<html>`/`<body>` wrappers are implied.
    #[default]
    Document,
    /// Fragment parsing for sites that serve partial HTML.
    Fragment,
}

impl ParseMode {
    /// Map a parser backend name onto a mode. `None` keeps the default.
    pub fn from_hint(hint: Option<&str>) -> Result<Self, AppError> {
        let Some(hint) = hint else {
            return Ok(Self::default());
        };
        match hint.trim().to_ascii_lowercase().as_str() {
            "html" | "html.parser" | "html5lib" | "lxml" | "document" => Ok(Self::Document),
            "fragment" => Ok(Self::Fragment),
            other => Err(AppError::ConfigError(format!("Unknown parser backend '{other}'"))),
        }
    }

    fn parse(self, html: &str) -> Html {
        match self {
            Self::Document => Html::parse_document(html),
            Self::Fragment => Html::parse_fragment(html),
        }
    }
}

/// Extracts listings and items with CSS selectors.
#[derive(Debug, Clone)]
pub struct SelectorParser {
    base_url: Url,
    selectors: Compiled,
    mode: ParseMode,
}

impl SelectorParser {
    pub fn new(base_url: Url, selectors: &SelectorSet) -> Result<Self, AppError> {
        let compiled = Compiled {
            pagination: compile("pagination", &selectors.pagination)?,
            listing_item: compile("listing_item", &selectors.listing_item)?,
            listing_title: compile("listing_title", &selectors.listing_title)?,
            listing_link: compile("listing_link", &selectors.listing_link)?,
            listing_poster: compile_opt("listing_poster", selectors.listing_poster.as_ref())?,
            title: compile("title", &selectors.title)?,
            poster: compile_opt("poster", selectors.poster.as_ref())?,
            tags: compile_opt("tags", selectors.tags.as_ref())?,
            author: compile_opt("author", selectors.author.as_ref())?,
            language: compile_opt("language", selectors.language.as_ref())?,
            gallery: compile_opt("gallery", selectors.gallery.as_ref())?,
        };
        Ok(Self {
            base_url,
            selectors: compiled,
            mode: ParseMode::default(),
        })
    }

    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    fn parse_reference(&self, item: ElementRef<'_>) -> Option<PageReference> {
        let link = item.select(&self.selectors.listing_link).next()?;
        let href = link.value().attr("href")?;
        let url = resolve(&self.base_url, href)?;

        let title = item
            .select(&self.selectors.listing_title)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .or_else(|| link.value().attr("title").map(|t| t.trim().to_string()))
            .filter(|t| !t.is_empty())?;

        let poster = self
            .selectors
            .listing_poster
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(image_source)
            .and_then(|src| resolve(&self.base_url, src))
            .unwrap_or_default();

        Some(PageReference::new(title, url, poster))
    }
}

impl SiteParser for SelectorParser {
    fn total_pages(&self, html: &str) -> Option<u32> {
        let document = self.mode.parse(html);
        document
            .select(&self.selectors.pagination)
            .filter_map(|el| text_of(el).parse::<u32>().ok())
            .max()
    }

    fn parse_page(&self, html: &str) -> Result<Vec<PageReference>, AppError> {
        let document = self.mode.parse(html);
        let mut references = Vec::new();
        for item in document.select(&self.selectors.listing_item) {
            match self.parse_reference(item) {
                Some(reference) => references.push(reference),
                None => tracing::debug!(base = %self.base_url, "Skipping listing item without title or link"),
            }
        }
        Ok(references)
    }

    fn parse_item(&self, url: &str, html: &str) -> Result<ScrapedItem, AppError> {
        let page_url = Url::parse(url)
            .map_err(|e| AppError::ParseError(format!("Invalid item URL '{url}': {e}")))?;
        let document = self.mode.parse(html);
        let root = document.root_element();

        let title = root
            .select(&self.selectors.title)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::ParseError(format!("No title found at {url}")))?;

        let first_text = |selector: &Option<Selector>| {
            selector
                .as_ref()
                .and_then(|sel| root.select(sel).next())
                .map(text_of)
                .filter(|t| !t.is_empty())
        };
        let images = |selector: &Option<Selector>| -> Vec<String> {
            selector
                .as_ref()
                .map(|sel| {
                    root.select(sel)
                        .filter_map(image_source)
                        .filter_map(|src| resolve(&page_url, src))
                        .collect()
                })
                .unwrap_or_default()
        };

        let tags = self
            .selectors
            .tags
            .as_ref()
            .map(|sel| {
                root.select(sel)
                    .map(text_of)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(ScrapedItem {
            title,
            url: page_url.to_string(),
            poster: images(&self.selectors.poster)
                .into_iter()
                .next()
                .unwrap_or_default(),
            tags,
            author: first_text(&self.selectors.author),
            language: first_text(&self.selectors.language),
            gallery: images(&self.selectors.gallery),
        })
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lazy-loaded images keep the real URL in `data-src`.
fn image_source(element: ElementRef<'_>) -> Option<&str> {
    let value = element.value();
    value
        .attr("data-src")
        .or_else(|| value.attr("src"))
        .filter(|src| !src.trim().is_empty())
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}
