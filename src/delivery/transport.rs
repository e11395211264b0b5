//! HTTP execution seam shared by the web upload targets.
//!
//! Targets describe a request as an [`UploadRequest`] and interpret an
//! [`UploadResponse`]; a [`Transport`] carries one to the other. Production
//! uses [`ReqwestTransport`], tests plug in scripted transports.
use async_trait::async_trait;
use std::time::Duration;

use super::error::{DeliveryError, TransportError};
use crate::logutil::body_preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Head,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl UploadRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn put_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            query: Vec::new(),
            json: Some(body),
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            url: url.into(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// URL with the percent-encoded query string appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, sep, query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

impl UploadResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UploadRequest) -> Result<UploadResponse, TransportError>;
}

/// Status rules every web target shares: rejected credentials never succeed
/// on retry, everything else non-2xx is treated as transient.
pub fn classify_status(target: &str, response: &UploadResponse) -> Result<(), DeliveryError> {
    match response.status {
        200..=299 => Ok(()),
        401 | 403 => Err(DeliveryError::non_retryable(format!(
            "{} rejected credentials (HTTP {})",
            target, response.status
        ))),
        status => Err(DeliveryError::retryable(format!(
            "{} returned HTTP {}: {}",
            target,
            status,
            body_preview(&response.body)
        ))),
    }
}

#[cfg(feature = "http")]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wxrelay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
        let url = request.full_url();
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Head => self.client.head(&url),
            Method::Put => self.client.put(&url),
        };
        let builder = match &request.json {
            Some(body) => builder.json(body),
            None => builder,
        };
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(UploadResponse { status, body })
    }
}

#[cfg(feature = "http")]
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Stand-in used when the crate is built without HTTP support.
pub struct DisabledTransport;

#[async_trait]
impl Transport for DisabledTransport {
    async fn send(&self, _request: UploadRequest) -> Result<UploadResponse, TransportError> {
        Err(TransportError::Unsupported)
    }
}

/// Timeout applied by callers that bypass the retry loop (heartbeat).
pub async fn send_with_timeout(
    transport: &dyn Transport,
    request: UploadRequest,
    limit: Duration,
) -> Result<UploadResponse, TransportError> {
    tokio::time::timeout(limit, transport.send(request))
        .await
        .map_err(|_| TransportError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url_encodes_query() {
        let req = UploadRequest::get("http://example.test/upload")
            .param("dateutc", "2024-01-02 03:04:05")
            .param("softwaretype", "wxrelay 0.3");
        assert_eq!(
            req.full_url(),
            "http://example.test/upload?dateutc=2024-01-02%2003%3A04%3A05&softwaretype=wxrelay%200.3"
        );
        assert_eq!(req.query_value("softwaretype"), Some("wxrelay 0.3"));
    }

    #[test]
    fn url_without_query_is_unchanged() {
        let req = UploadRequest::head("http://example.test/ping");
        assert_eq!(req.full_url(), "http://example.test/ping");
    }

    #[test]
    fn shared_status_rules() {
        assert!(classify_status("t", &UploadResponse::new(204, "")).is_ok());
        let err = classify_status("t", &UploadResponse::new(403, "")).unwrap_err();
        assert!(!err.is_retryable());
        let err = classify_status("t", &UploadResponse::new(502, "bad gateway")).unwrap_err();
        assert!(err.is_retryable());
    }
}
