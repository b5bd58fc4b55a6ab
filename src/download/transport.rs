//! Page transport
//!
//! One request per page, streamed into memory with a byte-progress callback.
//! Retrying and cancellation are the executor's business: a transport only
//! reports what happened to a single attempt.

use super::http_errors::{HttpErrorCategory, HttpErrorInfo};
use crate::app::config::NetworkConfig;
use crate::gallery::GalleryId;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::REFERER;
use std::time::Duration;
use thiserror::Error;

/// Progress callback: (bytes read so far, content length if known)
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Upper bound for the up-front body allocation
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Request for one page, tagged with its (gallery, index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub gallery: GalleryId,
    pub index: usize,
    pub url: String,
}

/// Failure of a single fetch attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Server answered with a non-success status
    #[error("{description}")]
    Status { status: u16, description: String },

    /// Connection, timeout or body read failure
    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn status(status: u16) -> Self {
        Self::Status {
            status,
            description: HttpErrorInfo::from_status(status).format(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(_) => None,
        }
    }

    /// Server asked us to slow down (HTTP 429)
    pub fn is_rate_limited(&self) -> bool {
        self.status_code()
            .map(|status| HttpErrorInfo::from_status(status).category == HttpErrorCategory::RateLimit)
            .unwrap_or(false)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        request: &PageRequest,
        progress: &ProgressFn,
    ) -> Result<Vec<u8>, TransportError>;
}

/// reqwest-backed transport; the client's connection pool is shared by every gallery
pub struct HttpTransport {
    client: reqwest::Client,
    referer: Option<String>,
}

impl HttpTransport {
    pub fn new(network: &NetworkConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&network.user_agent)
            .timeout(Duration::from_secs(network.timeout_secs))
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .pool_max_idle_per_host(network.pool_max_idle_per_host)
            .cookie_store(true)
            .build()?;

        Ok(Self::with_client(client, network.referer.clone()))
    }

    pub fn with_client(client: reqwest::Client, referer: Option<String>) -> Self {
        Self { client, referer }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        request: &PageRequest,
        progress: &ProgressFn,
    ) -> Result<Vec<u8>, TransportError> {
        tracing::trace!(
            "Fetching page {} of gallery {}: {}",
            request.index,
            request.gallery,
            request.url
        );

        let mut builder = self.client.get(&request.url);
        if let Some(ref referer) = self.referer {
            builder = builder.header(REFERER, referer);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::status(status.as_u16()));
        }

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(MAX_PREALLOCATION) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Network(e.to_string()))?;
            body.extend_from_slice(&chunk);
            progress(body.len() as u64, total);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String) -> PageRequest {
        PageRequest {
            gallery: GalleryId::new(1).unwrap(),
            index: 0,
            url,
        }
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(TransportError::status(429).is_rate_limited());
        assert!(!TransportError::status(503).is_rate_limited());
        assert!(!TransportError::Network("reset".into()).is_rate_limited());
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_reports_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4096];

        Mock::given(method("GET"))
            .and(path("/1/0.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_client(reqwest::Client::new(), None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let fetched = transport
            .fetch(&request(format!("{}/1/0.jpg", server.uri())), &move |read, total| {
                seen_clone.lock().unwrap().push((read, total));
            })
            .await
            .unwrap();

        assert_eq!(fetched, body);
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert_eq!(seen.last(), Some(&(4096, Some(4096))));
    }

    #[tokio::test]
    async fn test_fetch_maps_status_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_client(reqwest::Client::new(), None);
        let error = transport
            .fetch(&request(format!("{}/x.png", server.uri())), &|_, _| {})
            .await
            .unwrap_err();

        assert_eq!(error.status_code(), Some(502));
        assert_eq!(error.to_string(), "HTTP 502 - Bad Gateway");
    }

    #[tokio::test]
    async fn test_fetch_sends_referer() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("referer", "https://gallery.example/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let transport = HttpTransport::with_client(
            reqwest::Client::new(),
            Some("https://gallery.example/".to_string()),
        );

        let fetched = transport
            .fetch(&request(format!("{}/p.png", server.uri())), &|_, _| {})
            .await
            .unwrap();

        assert_eq!(fetched, b"ok");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_error() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), None);

        let error = transport
            .fetch(&request("http://127.0.0.1:9/never".to_string()), &|_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::Network(_)));
    }
}
