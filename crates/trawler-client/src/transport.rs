use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use trawler_core::error::AppError;
use trawler_core::proxy::ProxyRecord;
use trawler_core::traits::{HttpMethod, HttpTransport, TransportRequest, TransportResponse};

/// [`HttpTransport`] backed by reqwest.
///
/// reqwest binds proxies at client construction, so one client is built per
/// proxy on first use and reused afterwards.
pub struct ReqwestTransport {
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
    connect_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            direct: build_client(None, connect_timeout)?,
            proxied: Mutex::new(HashMap::new()),
            connect_timeout,
        })
    }

    fn lock_proxied(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.proxied.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy client mutex");
            poisoned.into_inner()
        })
    }

    fn client_for(&self, proxy: Option<&ProxyRecord>) -> Result<Client, AppError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut clients = self.lock_proxied();
        if let Some(client) = clients.get(&proxy.endpoint) {
            return Ok(client.clone());
        }
        let client = build_client(Some(proxy), self.connect_timeout)?;
        clients.insert(proxy.endpoint.clone(), client.clone());
        tracing::debug!(proxy = %proxy, "Built client for proxy");
        Ok(client)
    }
}

fn build_client(proxy: Option<&ProxyRecord>, connect_timeout: Duration) -> Result<Client, AppError> {
    let mut builder = Client::builder().connect_timeout(connect_timeout);
    if let Some(record) = proxy {
        let mut proxy = Proxy::all(&record.endpoint).map_err(|e| {
            AppError::ConfigError(format!("Invalid proxy '{}': {e}", record.endpoint))
        })?;
        if let Some(login) = &record.login {
            proxy = proxy.basic_auth(login, record.password.as_deref().unwrap_or(""));
        }
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AppError::HttpError(format!("Failed to build HTTP client: {e}")))
}

/// Transient failures become `Timeout` / `NetworkError` so the engine retries them.
fn classify(error: reqwest::Error, timeout: Duration) -> AppError {
    if error.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if error.is_connect() {
        AppError::NetworkError(format!("Connection failed: {error}"))
    } else if error.is_request() {
        AppError::NetworkError(format!("Request failed: {error}"))
    } else {
        AppError::HttpError(error.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse, AppError> {
        let client = self.client_for(request.proxy)?;
        let mut builder = match request.method {
            HttpMethod::Get => client.get(request.url),
            HttpMethod::Post => client.post(request.url),
        }
        .timeout(request.timeout);
        for (name, value) in request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, request.timeout))?;
        let status = response.status().as_u16();

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(request.timeout.as_secs())
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(TransportResponse::new(status, body.to_vec()))
    }
}
