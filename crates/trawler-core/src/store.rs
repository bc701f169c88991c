//! In-memory [`ItemStore`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ItemId, ScrapedItem};
use crate::traits::{ItemStore, Stored};

#[derive(Default)]
struct Inner {
    by_fingerprint: HashMap<String, ItemId>,
    items: Vec<(ItemId, ScrapedItem)>,
}

/// Item store keyed by fingerprint. Keeps insertion order.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned item store mutex");
            poisoned.into_inner()
        })
    }

    /// All stored items, oldest first.
    pub fn items(&self) -> Vec<ScrapedItem> {
        self.lock_inner()
            .items
            .iter()
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn get(&self, id: ItemId) -> Option<ScrapedItem> {
        self.lock_inner()
            .items
            .iter()
            .find(|(item_id, _)| *item_id == id)
            .map(|(_, item)| item.clone())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn add_item(&self, item: &ScrapedItem) -> Result<Stored, AppError> {
        let fingerprint = item.fingerprint();
        let mut inner = self.lock_inner();
        if let Some(id) = inner.by_fingerprint.get(&fingerprint) {
            return Ok(Stored::Duplicate(*id));
        }
        let id = Uuid::new_v4();
        inner.by_fingerprint.insert(fingerprint, id);
        inner.items.push((id, item.clone()));
        Ok(Stored::New(id))
    }

    async fn exists(&self, fingerprint: &str) -> Result<bool, AppError> {
        Ok(self.lock_inner().by_fingerprint.contains_key(fingerprint))
    }

    async fn total_count(&self) -> Result<u64, AppError> {
        Ok(self.lock_inner().items.len() as u64)
    }
}
