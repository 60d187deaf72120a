//! HTTP transport for the collector API
//!
//! Implements the collector protocol over reqwest: one session-create call
//! at recording start, batch event calls (JSON or compacted binary), and the
//! completion call used by the exit path.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::accel::CompactPayload;
use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::{CollectorTransport, ExitRequest, SessionCreateRequest};

/// Header carrying the number of events in a batch body.
pub const EVENT_COUNT_HEADER: &str = "X-Event-Count";
/// Header flagging a zstd-compressed batch body.
pub const COMPRESSED_HEADER: &str = "X-Payload-Compressed";

/// HTTP client for the collector API.
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport from configuration.
    ///
    /// Returns an error if the endpoint or site id cannot form valid
    /// headers; URL validity itself is checked by `EngineConfig::validate`.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let base_url = config.endpoint_base_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Site-Id",
            HeaderValue::from_str(&config.site_id)
                .map_err(|e| Error::Config(format!("invalid site_id: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.delivery.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    async fn check_response(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Delivery(format!(
            "API error ({}): {}",
            status, error_text
        )))
    }
}

#[async_trait]
impl CollectorTransport for HttpTransport {
    async fn create_session(&self, request: &SessionCreateRequest) -> Result<()> {
        let url = format!("{}/v1/sessions", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        Self::check_response(response).await
    }

    async fn send_batch(&self, session_id: &str, payload: &CompactPayload) -> Result<()> {
        let url = format!(
            "{}/v1/sessions/{}/events",
            self.base_url,
            urlencoding::encode(session_id)
        );

        let mut request = self
            .http_client
            .post(&url)
            .header(EVENT_COUNT_HEADER, payload.event_count)
            .body(payload.body.clone());

        // The content type and compression flag tell the collector how to
        // decode the body.
        request = if payload.compressed {
            request
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(COMPRESSED_HEADER, "zstd")
        } else {
            request.header(CONTENT_TYPE, "application/json")
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        Self::check_response(response).await
    }

    async fn send_exit(&self, request: &ExitRequest) -> Result<()> {
        let url = format!(
            "{}/v1/sessions/{}/complete",
            self.base_url,
            urlencoding::encode(&request.session_id)
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // Session unknown to the collector; nothing to complete.
            tracing::warn!(session_id = %request.session_id, "Completion for unknown session");
            return Ok(());
        }
        Self::check_response(response).await
    }
}

/// Check if an error is retryable (transient)
pub(crate) fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Delivery(msg) => {
            // Retry on 5xx errors
            msg.contains("50") && (msg.contains("API error") || msg.contains("HTTP"))
                // Retry on network/timeout errors
                || msg.contains("timeout")
                || msg.contains("connection")
                || msg.contains("request failed")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            consent_granted: true,
            ..EngineConfig::new("https://collect.example.com/", "site-1")
        }
    }

    #[test]
    fn test_transport_trims_trailing_slash() {
        let transport = HttpTransport::new(&config()).unwrap();
        assert_eq!(transport.base_url, "https://collect.example.com");
    }

    #[test]
    fn test_transport_rejects_bad_site_id() {
        let mut cfg = config();
        cfg.site_id = "bad\nsite".to_string();
        assert!(HttpTransport::new(&cfg).is_err());
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Delivery(
            "API error (500): internal error".to_string()
        )));
        assert!(is_retryable_error(&Error::Delivery(
            "HTTP request failed: timeout".to_string()
        )));
        assert!(!is_retryable_error(&Error::Delivery(
            "API error (400): bad request".to_string()
        )));
        assert!(!is_retryable_error(&Error::Delivery(
            "API error (401): unauthorized".to_string()
        )));
    }
}
