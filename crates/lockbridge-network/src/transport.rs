//! Transport seam between the request queue and the cloud service.
//!
//! [`CloudTransport`] uses native `async fn` (Edition 2024 RPITIT), which is
//! not object-safe, so [`AnyTransport`] provides enum dispatch over the
//! concrete transports:
//!
//! - [`HttpTransport`]: reqwest client, form-encoded bodies, bearer header
//! - [`MockTransport`]: scripted replies for tests and offline development
//!
//! Transports are dumb pipes. They never retry and never interpret the
//! response envelope; that is the request queue's job.

#![allow(async_fn_in_trait)]

use crate::mock::MockTransport;
use lockbridge_core::{Error, Result};
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// HTTP method of a cloud call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// Parameters are sent in the query string.
    Get,
    /// Parameters are sent as a form-encoded body.
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// One outbound call, fully parameterised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub bearer: Option<String>,
}

impl CloudRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            bearer: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Look up a parameter by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response: HTTP status and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudResponse {
    pub status: u16,
    pub body: String,
}

/// A way of delivering [`CloudRequest`]s to the cloud service.
pub trait CloudTransport: Send + Sync {
    /// Deliver one request and return the raw response.
    ///
    /// # Errors
    /// Returns `Error::Transport` if no HTTP response was obtained.
    async fn send(&self, request: &CloudRequest) -> Result<CloudResponse>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` with a per-request timeout.
    ///
    /// # Errors
    /// Returns `Error::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl CloudTransport for HttpTransport {
    async fn send(&self, request: &CloudRequest) -> Result<CloudResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        trace!(method = %request.method, %url, "Sending cloud request");

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url).query(&request.params),
            HttpMethod::Post => self.client.post(&url).form(&request.params),
        };
        let builder = match &request.bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {}: {e}", request.method, request.path)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("reading body of {}: {e}", request.path)))?;

        debug!(path = %request.path, status, "Cloud response received");
        Ok(CloudResponse { status, body })
    }
}

/// Enum wrapper for transport dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyTransport {
    /// Real HTTP transport.
    Http(HttpTransport),
    /// Scripted transport for tests and development.
    Mock(MockTransport),
}

impl CloudTransport for AnyTransport {
    async fn send(&self, request: &CloudRequest) -> Result<CloudResponse> {
        match self {
            Self::Http(transport) => transport.send(request).await,
            Self::Mock(transport) => transport.send(request).await,
        }
    }
}

impl From<HttpTransport> for AnyTransport {
    fn from(transport: HttpTransport) -> Self {
        Self::Http(transport)
    }
}

impl From<MockTransport> for AnyTransport {
    fn from(transport: MockTransport) -> Self {
        Self::Mock(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CloudRequest::new(HttpMethod::Post, "/v3/lock/lock")
            .param("lockId", 42)
            .param("clientId", "abc");
        assert_eq!(request.get("lockId"), Some("42"));
        assert_eq!(request.get("clientId"), Some("abc"));
        assert_eq!(request.get("missing"), None);
    }

    #[test]
    fn test_http_transport_trims_base_url() {
        let transport =
            HttpTransport::new("https://euapi.ttlock.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "https://euapi.ttlock.com");
    }

    #[test]
    fn test_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Post.to_string(), "POST");
    }
}
