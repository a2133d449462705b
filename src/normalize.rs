//! Text normalization ahead of synthesis.
//!
//! Units with the `diacritize` flag are sent through a diacritizer service
//! before they reach the provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("no normalizer configured")]
    NotConfigured,

    #[error("normalizer returned status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("normalizer returned an empty text")]
    Empty,

    #[error("normalizer request failed: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait TextNormalizer: Send + Sync {
    async fn normalize(&self, text: &str) -> Result<String, NormalizationError>;
}

#[derive(Serialize)]
struct DiacritizeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct DiacritizeResponse {
    text: String,
}

/// HTTP diacritizer: `POST {url} {"text": ...}` → `{"text": ...}`.
pub struct DiacritizerClient {
    http: Client,
    url: String,
}

impl DiacritizerClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: crate::providers::client::build_client(timeout),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TextNormalizer for DiacritizerClient {
    async fn normalize(&self, text: &str) -> Result<String, NormalizationError> {
        let response = self
            .http
            .post(&self.url)
            .json(&DiacritizeRequest { text })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NormalizationError::ApiError {
                status: status.as_u16(),
                message,
            });
        }
        let body: DiacritizeResponse = response.json().await?;
        if body.text.trim().is_empty() {
            return Err(NormalizationError::Empty);
        }
        Ok(body.text)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn returns_normalized_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"text": "مرحبا"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "مَرْحَبًا"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = DiacritizerClient::new(server.uri(), Duration::from_secs(5));
        assert_eq!(client.normalize("مرحبا").await.unwrap(), "مَرْحَبًا");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
            .mount(&server)
            .await;

        let client = DiacritizerClient::new(server.uri(), Duration::from_secs(5));
        match client.normalize("x").await.unwrap_err() {
            NormalizationError::ApiError { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "model loading");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_result_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": " "})))
            .mount(&server)
            .await;

        let client = DiacritizerClient::new(server.uri(), Duration::from_secs(5));
        assert!(matches!(
            client.normalize("x").await.unwrap_err(),
            NormalizationError::Empty
        ));
    }
}
