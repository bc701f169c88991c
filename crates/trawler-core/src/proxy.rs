//! Proxy rotation with per-proxy health tracking.
//!
//! Each proxy counts consecutive failed attempts. Once the count reaches
//! `max_chance` and banning is enabled, the proxy is disabled for the rest of
//! the process lifetime. A successful attempt resets the count.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A proxy endpoint with optional credentials.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub endpoint: String,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl ProxyRecord {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            login: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, login: impl Into<String>, password: Option<String>) -> Self {
        self.login = Some(login.into());
        self.password = password;
        self
    }
}

// Keep credentials out of logs.
impl fmt::Debug for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRecord")
            .field("endpoint", &self.endpoint)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)
    }
}

impl FromStr for ProxyRecord {
    type Err = AppError;

    /// Accepts `endpoint`, `endpoint@login` and `endpoint@login:password`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AppError::ConfigError("Empty proxy definition".into()));
        }

        let Some((endpoint, auth)) = s.rsplit_once('@') else {
            return Ok(Self::new(s));
        };
        if endpoint.is_empty() || auth.is_empty() {
            return Err(AppError::ConfigError(format!("Invalid proxy definition '{s}'")));
        }

        let record = match auth.split_once(':') {
            Some((login, password)) => {
                Self::new(endpoint).with_credentials(login, Some(password.to_string()))
            }
            None => Self::new(endpoint).with_credentials(auth, None),
        };
        Ok(record)
    }
}

/// Health policy for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPolicy {
    /// Consecutive failures before a proxy is banned.
    pub max_chance: u32,
    pub ban_on_failure: bool,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self {
            max_chance: 3,
            ban_on_failure: true,
        }
    }
}

#[derive(Debug)]
struct ProxyEntry {
    record: ProxyRecord,
    failures: AtomicU32,
    enabled: AtomicBool,
}

/// Health snapshot for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStats {
    pub endpoint: String,
    pub failures: u32,
    pub enabled: bool,
}

/// Handle to the proxy chosen for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySlot(usize);

/// Pool of proxies shared by every request going through one engine.
#[derive(Debug)]
pub struct ProxyPool {
    entries: Vec<ProxyEntry>,
    policy: ProxyPolicy,
}

impl ProxyPool {
    pub fn new(records: Vec<ProxyRecord>, policy: ProxyPolicy) -> Self {
        let entries = records
            .into_iter()
            .map(|record| ProxyEntry {
                record,
                failures: AtomicU32::new(0),
                enabled: AtomicBool::new(true),
            })
            .collect();
        Self { entries, policy }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), ProxyPolicy::default())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn healthy_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.enabled.load(Ordering::Relaxed))
            .count()
    }

    /// Pick a healthy proxy uniformly at random. `None` means connect directly.
    pub fn select(&self) -> Option<(ProxySlot, &ProxyRecord)> {
        let healthy: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.enabled.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .collect();
        if healthy.is_empty() {
            if !self.entries.is_empty() {
                tracing::warn!("All proxies are banned, connecting directly");
            }
            return None;
        }
        let index = healthy[fastrand::usize(..healthy.len())];
        Some((ProxySlot(index), &self.entries[index].record))
    }

    pub fn record_success(&self, slot: ProxySlot) {
        if let Some(entry) = self.entries.get(slot.0) {
            entry.failures.store(0, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, slot: ProxySlot) {
        let Some(entry) = self.entries.get(slot.0) else {
            return;
        };
        let failures = entry.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.policy.ban_on_failure
            && failures >= self.policy.max_chance
            && entry.enabled.swap(false, Ordering::Relaxed)
        {
            tracing::warn!(
                proxy = %entry.record,
                failures,
                "Proxy banned after {} consecutive failures",
                failures
            );
        }
    }

    pub fn stats(&self) -> Vec<ProxyStats> {
        self.entries
            .iter()
            .map(|e| ProxyStats {
                endpoint: e.record.endpoint.clone(),
                failures: e.failures.load(Ordering::Relaxed),
                enabled: e.enabled.load(Ordering::Relaxed),
            })
            .collect()
    }
}
