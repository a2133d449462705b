use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{ObjectStorage, StorageError, validate_key};

/// Object store reached over plain HTTP: `PUT {base}/{key}`, then `GET`/`DELETE`
/// on the returned URL.
pub struct HttpStorage {
    http: Client,
    base_url: String,
}

impl HttpStorage {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: crate::providers::client::build_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn owns(&self, uri: &str) -> Result<(), StorageError> {
        match uri.strip_prefix(&self.base_url) {
            Some(rest) if rest.starts_with('/') => Ok(()),
            _ => Err(StorageError::ForeignUri(uri.to_string())),
        }
    }
}

async fn check(response: reqwest::Response, uri: &str) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(uri.to_string()));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(StorageError::ApiError {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    fn name(&self) -> &str {
        "http"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        validate_key(key)?;
        let uri = format!("{}/{}", self.base_url, key);
        let response = self
            .http
            .put(&uri)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(bytes.to_vec())
            .send()
            .await?;
        check(response, &uri).await?;
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        self.owns(uri)?;
        let response = check(self.http.get(uri).send().await?, uri).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
