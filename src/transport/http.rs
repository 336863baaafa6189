use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Method, Proxy};
use serde_json::Value;
use std::env;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Run `fut` with `id` sent as `x-request-id` on every request it issues.
pub async fn with_request_id<F: Future>(id: String, fut: F) -> F::Output {
    REQUEST_ID.scope(id, fut).await
}

fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// Shared HTTP transport for one client instance.
///
/// Wraps a single pooled `reqwest::Client` that every adapter reuses. The
/// handle can be released with [`dispose`](Self::dispose); later calls fail
/// with a transport error instead of reopening connections.
pub struct HttpTransport {
    client: Mutex<Option<reqwest::Client>>,
    base_url: Url,
    provider: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        provider: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let provider = provider.into();
        let mut base_url = Url::parse(base_url).map_err(|e| {
            Error::configuration(format!("Invalid base_url '{}': {}", base_url, e))
        })?;
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        // No overall request timeout here: deadlines are per attempt and a
        // streaming body may legitimately outlive one.
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(
                env::var("LOCALAI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("LOCALAI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(|e| {
            Error::transport(
                format!("Failed to build HTTP client: {}", e),
                ErrorContext::new()
                    .with_provider(provider.clone())
                    .with_source("transport"),
            )
        })?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            base_url,
            provider,
            api_key: api_key.filter(|k| !k.is_empty()),
            connect_timeout,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn ctx(&self) -> ErrorContext {
        ErrorContext::new()
            .with_provider(self.provider.clone())
            .with_source("transport")
    }

    fn client(&self) -> Result<reqwest::Client> {
        let guard = self.client.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .clone()
            .ok_or_else(|| Error::transport("client disposed", self.ctx()))
    }

    /// Release the pooled connections. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut guard = self.client.lock().unwrap_or_else(|p| p.into_inner());
        if guard.take().is_some() {
            tracing::debug!(provider = %self.provider, "http transport disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::configuration(format!("Invalid endpoint path '{}': {}", path, e)))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        accept: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        tracing::debug!(provider = %self.provider, method = %method, url = %url, "dispatching request");

        let mut req = self.client()?.request(method, url).header("accept", accept);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(id) = current_request_id() {
            req = req.header("x-request-id", id);
        }

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(self.ctx())),
            r = req.send() => r.map_err(|e| Error::from_reqwest(e, &self.provider, self.connect_timeout))?,
        };

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::protocol(
            format!("API request failed with status {}", status.as_u16()),
            self.ctx()
                .with_status_code(status.as_u16())
                .with_response_body(text),
        ))
    }

    async fn read_json(&self, resp: reqwest::Response, cancel: &CancellationToken) -> Result<Value> {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(self.ctx())),
            b = resp.bytes() => b.map_err(|e| Error::from_reqwest(e, &self.provider, self.connect_timeout))?,
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::protocol(
                format!("Malformed response body: {}", e),
                self.ctx()
                    .with_response_body(String::from_utf8_lossy(&bytes).into_owned()),
            )
        })
    }

    pub async fn get_json(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
        let resp = self
            .send(Method::GET, path, None, "application/json", cancel)
            .await?;
        self.read_json(resp, cancel).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let resp = self
            .send(Method::POST, path, Some(body), "application/json", cancel)
            .await?;
        self.read_json(resp, cancel).await
    }

    /// POST and hand back the response body as a byte stream once the status
    /// line has been checked.
    pub async fn post_stream(
        &self,
        path: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Bytes>> {
        let resp = self
            .send(Method::POST, path, Some(body), "text/event-stream", cancel)
            .await?;
        let provider = self.provider.clone();
        let after = self.connect_timeout;
        let byte_stream = resp
            .bytes_stream()
            .map_err(move |e| Error::from_reqwest(e, &provider, after));
        Ok(Box::pin(byte_stream))
    }
}
