//! Network priming and page reload seams

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use thiserror::Error;

/// Errors that can occur while priming the network
#[derive(Debug, Error)]
pub enum PrimeError {
    /// HTTP request failed
    #[error("Priming request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with an error status
    #[error("Priming request returned status {0}")]
    Status(u16),
}

/// Issues a request that bypasses every HTTP cache
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkPrimer: Send + Sync {
    /// Fetches `url` with no-cache directives, returning the status code
    async fn prime(&self, url: &str) -> Result<u16, PrimeError>;
}

/// Network primer backed by reqwest
pub struct HttpPrimer {
    client: Client,
}

impl HttpPrimer {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(client)
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpPrimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkPrimer for HttpPrimer {
    async fn prime(&self, url: &str) -> Result<u16, PrimeError> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PrimeError::Status(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

/// Reloads the page
#[cfg_attr(test, mockall::automock)]
pub trait PageReloader: Send + Sync {
    fn reload(&self);
}

/// Reloader for hosts without a page; records the request in the log
#[derive(Debug, Default)]
pub struct LoggingReloader;

impl PageReloader for LoggingReloader {
    fn reload(&self) {
        tracing::info!("Page reload requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_primer_sends_no_cache_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(headers(
                "cache-control",
                vec!["no-cache", "no-store", "must-revalidate"],
            ))
            .and(header("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let primer = HttpPrimer::new();
        let status = primer.prime(&format!("{}/", server.uri())).await.unwrap();
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn test_http_primer_reports_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let primer = HttpPrimer::new();
        let result = primer.prime(&server.uri()).await;
        assert!(matches!(result, Err(PrimeError::Status(503))));
    }

    #[tokio::test]
    async fn test_http_primer_connection_failure() {
        let primer = HttpPrimer::new();
        let result = primer.prime("http://127.0.0.1:9/").await;
        assert!(matches!(result, Err(PrimeError::Request(_))));
    }
}
