use thiserror::Error;

/// Application-wide error types for Trawler.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (bad URL, unreadable body, unexpected status).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error (refused, reset, disconnected).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Missing or invalid configuration. Never retried.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No managed spider matches the given name, type or instance.
    #[error("Spider '{0}' does not exist")]
    SpiderNotFound(String),

    /// Persistence collaborator failed.
    #[error("Store error: {0}")]
    StoreError(String),

    /// Markup could not be turned into page references or items.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The run was cancelled through its cancellation token.
    #[error("Run cancelled")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true for setup mistakes such as a bad manifest or a missing
    /// store. Loading spiders fails on these; inside a run they end the run
    /// with an `error` status like any other failure.
    pub fn is_config(&self) -> bool {
        matches!(self, AppError::ConfigError(_))
    }
}
