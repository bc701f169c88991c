use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identity assigned by the persistence collaborator.
pub type ItemId = Uuid;

/// Length of a fingerprint, in hex characters.
pub const FINGERPRINT_LEN: usize = 32;

/// An item stub discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReference {
    pub title: String,
    /// Detail page URL, passed to `Spider::get`.
    pub url: String,
    /// Poster / thumbnail URL.
    pub poster: String,
}

impl PageReference {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        poster: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            poster: poster.into(),
        }
    }

    /// Stable dedup key derived from the title.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title)
    }
}

/// A fully scraped item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub title: String,
    pub url: String,
    pub poster: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Asset URLs, in page order.
    #[serde(default)]
    pub gallery: Vec<String>,
}

impl ScrapedItem {
    /// Start an item from its listing stub; details are filled in by the parser.
    pub fn from_reference(reference: PageReference) -> Self {
        Self {
            title: reference.title,
            url: reference.url,
            poster: reference.poster,
            tags: Vec::new(),
            author: None,
            language: None,
            gallery: Vec::new(),
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title)
    }

    pub fn reference(&self) -> PageReference {
        PageReference::new(&self.title, &self.url, &self.poster)
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content fingerprint: the first 32 hex chars of the title hash.
pub fn fingerprint(title: &str) -> String {
    let mut hash = compute_hash(title);
    hash.truncate(FINGERPRINT_LEN);
    hash
}
