//! Explicit configuration, built once at start-up and passed into each
//! component's constructor.

use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::proxy::{ProxyPolicy, ProxyRecord};

/// Request engine settings.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Upper bound on in-flight requests across every spider sharing the engine.
    pub max_concurrent_requests: usize,
    pub max_retries: u32,
    /// Base delay slept after each attempt (backoff and politeness delay).
    pub retry_delay: Duration,
    /// Multiply the delay by a uniform [0, 1] factor.
    pub use_jitter: bool,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
    pub proxies: Vec<ProxyRecord>,
    pub proxy_policy: ProxyPolicy,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            use_jitter: true,
            timeout: Duration::from_secs(30),
            cache_capacity: 128,
            cache_ttl: Duration::from_secs(300),
            proxies: Vec::new(),
            proxy_policy: ProxyPolicy::default(),
        }
    }
}

impl RequestConfig {
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration, use_jitter: bool) -> Self {
        self.retry_delay = delay;
        self.use_jitter = use_jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache_capacity = capacity;
        self.cache_ttl = ttl;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<ProxyRecord>, policy: ProxyPolicy) -> Self {
        self.proxies = proxies;
        self.proxy_policy = policy;
        self
    }

    /// Effective sleep after one attempt.
    pub fn effective_delay(&self) -> Duration {
        if !self.use_jitter || self.retry_delay.is_zero() {
            return self.retry_delay;
        }
        self.retry_delay.mul_f64(fastrand::f64())
    }

    /// Read configuration from environment variables.
    ///
    /// - `TRAWLER_MAX_CONCURRENT` (default 5)
    /// - `TRAWLER_MAX_RETRIES` (default 3)
    /// - `TRAWLER_RETRY_DELAY_MS` (default 2000)
    /// - `TRAWLER_USE_JITTER` (default true)
    /// - `TRAWLER_REQUEST_TIMEOUT_SECS` (default 30)
    /// - `TRAWLER_CACHE_SIZE` (default 128)
    /// - `TRAWLER_CACHE_TTL_SECS` (default 300)
    /// - `TRAWLER_PROXIES` (comma-separated `endpoint[@login[:password]]`)
    /// - `TRAWLER_PROXY_MAX_CHANCE` (default 3)
    /// - `TRAWLER_PROXY_BAN` (default true)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let max_concurrent_requests: usize = parse_var(
            &lookup,
            "TRAWLER_MAX_CONCURRENT",
            defaults.max_concurrent_requests,
        )?;
        if max_concurrent_requests == 0 {
            return Err(AppError::ConfigError(
                "TRAWLER_MAX_CONCURRENT must be at least 1".into(),
            ));
        }

        let max_retries: u32 = parse_var(&lookup, "TRAWLER_MAX_RETRIES", defaults.max_retries)?;
        if max_retries == 0 {
            return Err(AppError::ConfigError(
                "TRAWLER_MAX_RETRIES must be at least 1".into(),
            ));
        }

        let retry_delay_ms: u64 = parse_var(
            &lookup,
            "TRAWLER_RETRY_DELAY_MS",
            defaults.retry_delay.as_millis() as u64,
        )?;
        let timeout_secs: u64 = parse_var(
            &lookup,
            "TRAWLER_REQUEST_TIMEOUT_SECS",
            defaults.timeout.as_secs(),
        )?;
        let cache_ttl_secs: u64 = parse_var(
            &lookup,
            "TRAWLER_CACHE_TTL_SECS",
            defaults.cache_ttl.as_secs(),
        )?;

        let proxies = match lookup("TRAWLER_PROXIES") {
            None => Vec::new(),
            Some(raw) => split_list(&raw)
                .map(|p| p.parse::<ProxyRecord>())
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Self {
            max_concurrent_requests,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            use_jitter: parse_var(&lookup, "TRAWLER_USE_JITTER", defaults.use_jitter)?,
            timeout: Duration::from_secs(timeout_secs),
            cache_capacity: parse_var(&lookup, "TRAWLER_CACHE_SIZE", defaults.cache_capacity)?,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            proxies,
            proxy_policy: ProxyPolicy {
                max_chance: parse_var(
                    &lookup,
                    "TRAWLER_PROXY_MAX_CHANCE",
                    defaults.proxy_policy.max_chance,
                )?,
                ban_on_failure: parse_var(
                    &lookup,
                    "TRAWLER_PROXY_BAN",
                    defaults.proxy_policy.ban_on_failure,
                )?,
            },
        })
    }
}

/// Top-level crawl settings: request engine plus supervisor knobs.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub request: RequestConfig,
    /// Maximum page references per discovered batch.
    pub batch_size: usize,
    /// Spider names that must not be loaded.
    pub banned_spiders: Vec<String>,
    /// How long `stop` waits for a cancelled run before aborting it.
    pub stop_grace: Duration,
    /// Parser backend handed to spiders through their context.
    pub parser_hint: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            request: RequestConfig::default(),
            batch_size: 10,
            banned_spiders: Vec::new(),
            stop_grace: Duration::from_secs(10),
            parser_hint: None,
        }
    }
}

impl CrawlConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_banned_spiders(mut self, banned: Vec<String>) -> Self {
        self.banned_spiders = banned;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_parser_hint(mut self, hint: impl Into<String>) -> Self {
        self.parser_hint = Some(hint.into());
        self
    }

    /// Read configuration from environment variables.
    ///
    /// Includes every [`RequestConfig`] variable plus:
    /// - `TRAWLER_BATCH_SIZE` (default 10)
    /// - `TRAWLER_BANNED_SPIDERS` (comma-separated spider names)
    /// - `TRAWLER_STOP_GRACE_SECS` (default 10)
    /// - `TRAWLER_PARSER` (parser backend, unset by default)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let request = RequestConfig::from_lookup(&lookup)?;

        let batch_size: usize = parse_var(&lookup, "TRAWLER_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(AppError::ConfigError(
                "TRAWLER_BATCH_SIZE must be at least 1".into(),
            ));
        }

        let banned_spiders: Vec<String> = lookup("TRAWLER_BANNED_SPIDERS")
            .map(|raw| split_list(&raw).map(str::to_string).collect())
            .unwrap_or_default();

        let grace_secs: u64 = parse_var(
            &lookup,
            "TRAWLER_STOP_GRACE_SECS",
            defaults.stop_grace.as_secs(),
        )?;

        Ok(Self {
            request,
            batch_size,
            banned_spiders,
            stop_grace: Duration::from_secs(grace_secs),
            parser_hint: lookup("TRAWLER_PARSER")
                .map(|raw| raw.trim().to_string())
                .filter(|hint| !hint.is_empty()),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}'"))
        }),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
