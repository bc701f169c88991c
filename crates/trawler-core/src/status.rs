use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a spider as reported to outer layers.
///
/// The snake_case string values are a stable wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiderStatusKind {
    Success,
    Error,
    Processing,
    NotRunning,
    Running,
    Cancelled,
}

impl SpiderStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpiderStatusKind::Success => "success",
            SpiderStatusKind::Error => "error",
            SpiderStatusKind::Processing => "processing",
            SpiderStatusKind::NotRunning => "not_running",
            SpiderStatusKind::Running => "running",
            SpiderStatusKind::Cancelled => "cancelled",
        }
    }

    /// `NotRunning` is both the initial and the post-stop state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SpiderStatusKind::Success
                | SpiderStatusKind::Error
                | SpiderStatusKind::Cancelled
                | SpiderStatusKind::NotRunning
        )
    }
}

impl fmt::Display for SpiderStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpiderStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(SpiderStatusKind::Success),
            "error" => Ok(SpiderStatusKind::Error),
            "processing" => Ok(SpiderStatusKind::Processing),
            "not_running" => Ok(SpiderStatusKind::NotRunning),
            "running" => Ok(SpiderStatusKind::Running),
            "cancelled" => Ok(SpiderStatusKind::Cancelled),
            _ => Err(format!("Unknown spider status: {}", s)),
        }
    }
}

/// Snapshot of one spider's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiderStatus {
    pub name: String,
    pub status: SpiderStatusKind,
    /// Progress text or error detail.
    pub message: Option<String>,
}

impl SpiderStatus {
    pub fn new(name: impl Into<String>, status: SpiderStatusKind) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for SpiderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] - {}", self.name, self.status)?;
        if let Some(message) = &self.message {
            write!(f, " | {message}")?;
        }
        Ok(())
    }
}
