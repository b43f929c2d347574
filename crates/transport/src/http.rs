//! reqwest-backed transport
//!
//! Joins each request path onto the configured base URL, forwards the
//! request's headers and body verbatim, and buffers the full response body.
//! Every status code is returned as `Ok`; classification belongs to the
//! session layer.

use std::time::Duration;

use reqwest::ClientBuilder;
use tracing::{debug, instrument, warn};

use crate::request::{ApiRequest, ApiResponse};
use crate::{Error, Result, SendFuture, Transport};

/// Default User-Agent for API calls.
const USER_AGENT: &str = concat!("flock-client/", env!("CARGO_PKG_VERSION"));

/// HTTP transport targeting a single backend base URL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport with default settings (no client-side timeout).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder().base_url(base_url).build()
    }

    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    #[instrument(skip_all, fields(request_id = %request.id(), method = %request.method(), path = %request.path()))]
    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method().clone(), self.url_for(request.path()))
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(error = %e, "request timed out");
                Error::Timeout(format!("{} {}: {e}", request.method(), request.path()))
            } else {
                warn!(error = %e, "request failed");
                Error::Http(format!("{} {}: {e}", request.method(), request.path()))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("reading response body: {e}")))?;

        debug!(status = status.as_u16(), bytes = body.len(), "response received");
        Ok(ApiResponse::new(status, headers, body))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> SendFuture<'_> {
        Box::pin(self.dispatch(request))
    }
}

/// Builder for `HttpTransport`
#[derive(Default)]
pub struct HttpTransportBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpTransportBuilder {
    /// Set the backend base URL (required, http or https)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set a per-request timeout applied by the HTTP client
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".into()))?;

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base_url must start with http:// or https://, got: {base_url}"
            )));
        }

        let base_url = base_url.trim_end_matches('/').to_string();

        let mut builder = ClientBuilder::new()
            .user_agent(self.user_agent.unwrap_or_else(|| USER_AGENT.to_string()));
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;

        Ok(HttpTransport { client, base_url })
    }
}
