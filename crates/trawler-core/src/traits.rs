use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::alert::AlertLevel;
use crate::error::AppError;
use crate::models::{ItemId, ScrapedItem};
use crate::proxy::ProxyRecord;

/// HTTP method understood by the request engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt, as handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    /// `None` means a direct connection.
    pub proxy: Option<&'a ProxyRecord>,
    pub timeout: Duration,
}

/// Raw response. Non-success statuses are returned, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single HTTP exchange. Retries, caching and proxy health are
/// handled above this seam by [`RequestEngine`](crate::request::RequestEngine).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Errors must be classified: `Timeout` / `NetworkError` for transient
    /// failures, `HttpError` for everything else.
    async fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse, AppError>;
}

/// Result of handing an item to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    New(ItemId),
    /// An item with the same fingerprint already existed; carries its id.
    Duplicate(ItemId),
}

impl Stored {
    pub fn id(&self) -> ItemId {
        match self {
            Stored::New(id) | Stored::Duplicate(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Stored::New(_))
    }
}

/// Persistence collaborator, also the dedup gate.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Persist an item. Adding an existing fingerprint must not create a
    /// second record.
    async fn add_item(&self, item: &ScrapedItem) -> Result<Stored, AppError>;

    /// Whether an item with this fingerprint is already known.
    async fn exists(&self, fingerprint: &str) -> Result<bool, AppError>;

    async fn total_count(&self) -> Result<u64, AppError>;
}

/// A destination for lifecycle alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Returns `Ok(false)` when the sink considers itself dead. Both `false`
    /// and `Err` get the sink pruned from the fan-out.
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<bool, AppError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
