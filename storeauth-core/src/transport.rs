//! HTTP request execution.
//!
//! [`Transport`] is the seam between the session and the network. Non-2xx
//! responses are ordinary results at this layer; only failures to obtain a
//! response at all become a [`TransportError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

pub use reqwest::{Method, StatusCode};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Error type for transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// DNS resolution or connection establishment failed.
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    /// No response arrived within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Any other failure while sending the request or reading the body.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a JSON body and the matching `Content-Type`/`Accept` headers.
    pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(body)?;
        Ok(self
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_header(ACCEPT, HeaderValue::from_static("application/json"))
            .with_body(bytes))
    }
}

/// A response as received from the server, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// First value of header `name`, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Executes HTTP requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request).await
    }
}

/// Timeout and retry policy for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-attempt timeout covering connect, send, and body read.
    pub timeout: Duration,

    /// Extra attempts made when the connection itself fails.
    pub connect_retries: u32,

    /// Delay before the first retry; later retries wait proportionally longer.
    pub retry_backoff: Duration,

    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            user_agent: format!("storeauth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// [`Transport`] implementation on top of `reqwest`.
///
/// Connection failures are retried up to `connect_retries` times; timeouts
/// and every other error are returned immediately.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Create a transport with the default policy.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        let mut attempt = 0;

        loop {
            match self.send_once(&request).await {
                Ok(response) => {
                    tracing::debug!("{} {} -> {}", request.method, url, response.status);
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => {
                    return Err(TransportError::Timeout { url });
                }
                Err(e) if e.is_connect() => {
                    if attempt >= self.config.connect_retries {
                        return Err(TransportError::Connect {
                            url,
                            message: e.to_string(),
                        });
                    }
                    attempt += 1;
                    tracing::warn!(
                        "Connection to {} failed ({}), retry {}/{}",
                        url,
                        e,
                        attempt,
                        self.config.connect_retries
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) => {
                    return Err(TransportError::Request {
                        url,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
