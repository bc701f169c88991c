//! Alert fan-out.
//!
//! Lifecycle messages are broadcast to every registered [`AlertSink`].
//! Sinks fail independently: a sink that returns `false` or an error is
//! pruned after the broadcast pass and never retried, while delivery to the
//! remaining sinks proceeds.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::traits::AlertSink;

/// Severity attached to every alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(AlertLevel::Info),
            "warning" => Ok(AlertLevel::Warning),
            "error" => Ok(AlertLevel::Error),
            "critical" => Ok(AlertLevel::Critical),
            _ => Err(format!("Unknown alert level: {}", s)),
        }
    }
}

/// Registry of alert sinks with concurrent, failure-isolated delivery.
#[derive(Default)]
pub struct AlertManager {
    sinks: Mutex<Vec<Arc<dyn AlertSink>>>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_sinks(&self) -> MutexGuard<'_, Vec<Arc<dyn AlertSink>>> {
        self.sinks.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned alert sink mutex");
            poisoned.into_inner()
        })
    }

    /// Register a sink. Registering the same sink twice is a logged no-op.
    pub fn register(&self, sink: Arc<dyn AlertSink>) {
        let mut sinks = self.lock_sinks();
        if sinks.iter().any(|s| Arc::ptr_eq(s, &sink)) {
            tracing::debug!(sink = %sink.name(), "Alert sink already registered");
            return;
        }
        tracing::debug!(sink = %sink.name(), "Registered alert sink");
        sinks.push(sink);
    }

    /// Remove a sink. Returns false if it was not registered.
    pub fn unregister(&self, sink: &Arc<dyn AlertSink>) -> bool {
        let mut sinks = self.lock_sinks();
        let before = sinks.len();
        sinks.retain(|s| !Arc::ptr_eq(s, sink));
        let removed = sinks.len() != before;
        if removed {
            tracing::debug!(sink = %sink.name(), "Removed alert sink");
        } else {
            tracing::warn!(sink = %sink.name(), "Alert sink not found");
        }
        removed
    }

    /// Snapshot of the registered sinks.
    pub fn sinks(&self) -> Vec<Arc<dyn AlertSink>> {
        self.lock_sinks().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_sinks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_sinks().is_empty()
    }

    /// Deliver `message` to every sink concurrently and prune the ones that
    /// failed. Never returns an error.
    pub async fn broadcast(&self, message: &str, level: AlertLevel) {
        let snapshot = self.sinks();
        if snapshot.is_empty() {
            tracing::debug!(%level, "No alert sinks registered");
            return;
        }

        let deliveries = snapshot.iter().map(|sink| async move {
            match sink.deliver(message, level).await {
                Ok(true) => None,
                Ok(false) => {
                    tracing::debug!(sink = %sink.name(), "Alert sink reported itself dead");
                    Some(Arc::clone(sink))
                }
                Err(e) => {
                    tracing::error!(sink = %sink.name(), error = %e, "Alert delivery failed");
                    Some(Arc::clone(sink))
                }
            }
        });
        let dead: Vec<_> = join_all(deliveries).await.into_iter().flatten().collect();

        if !dead.is_empty() {
            let mut sinks = self.lock_sinks();
            sinks.retain(|s| !dead.iter().any(|d| Arc::ptr_eq(s, d)));
            tracing::debug!(pruned = dead.len(), remaining = sinks.len(), "Pruned alert sinks");
        }
    }

    /// Fire-and-forget broadcast on the current tokio runtime.
    ///
    /// Outside a runtime this is a logged no-op.
    pub fn notify(self: &Arc<Self>, message: impl Into<String>, level: AlertLevel) {
        let message = message.into();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = Arc::clone(self);
                handle.spawn(async move { manager.broadcast(&message, level).await });
            }
            Err(_) => {
                tracing::debug!(%level, %message, "No async runtime, alert dropped");
            }
        }
    }
}

/// Sink that writes alerts to the `tracing` log. Never dies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn deliver(&self, message: &str, level: AlertLevel) -> Result<bool, AppError> {
        match level {
            AlertLevel::Info => tracing::info!(target: "trawler::alert", "{message}"),
            AlertLevel::Warning => tracing::warn!(target: "trawler::alert", "{message}"),
            AlertLevel::Error | AlertLevel::Critical => {
                tracing::error!(target: "trawler::alert", %level, "{message}")
            }
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "tracing"
    }
}
