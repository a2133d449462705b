//! Durable artifact storage.
//!
//! Unit artifacts and composites are uploaded to a primary backend and, when
//! configured, mirrored to a second one. The mirror never fails an upload.

mod http;
mod local;

pub use http::HttpStorage;
pub use local::LocalStorage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{StorageBackend, StorageConfig, StorageTarget};
use crate::job::ArtifactRef;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend is not configured: {0}")]
    NotConfigured(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("uri `{0}` does not belong to this backend")]
    ForeignUri(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage returned status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("storage request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A place where artifact bytes survive the working area.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Store `bytes` under `key`, returning the URI to read them back.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError>;
}

/// Keys are flat relative names like `<job>/block0.wav`.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Primary backend plus an optional mirror.
#[derive(Clone)]
pub struct StorageManager {
    primary: Arc<dyn ObjectStorage>,
    mirror: Option<Arc<dyn ObjectStorage>>,
}

impl StorageManager {
    pub fn new(primary: Arc<dyn ObjectStorage>) -> Self {
        Self {
            primary,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn ObjectStorage>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn from_config(config: &StorageConfig, timeout: Duration) -> Result<Self, StorageError> {
        let manager = Self::new(backend(&config.primary, timeout)?);
        Ok(match &config.mirror {
            Some(mirror) => manager.with_mirror(backend(mirror, timeout)?),
            None => manager,
        })
    }

    /// Upload to the primary, then best-effort to the mirror.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> Result<ArtifactRef, StorageError> {
        let primary = self.primary.put(key, bytes).await?;
        debug!(key, backend = self.primary.name(), uri = %primary, "artifact stored");

        let mirror = match &self.mirror {
            Some(mirror) => match mirror.put(key, bytes).await {
                Ok(uri) => Some(uri),
                Err(e) => {
                    warn!(key, backend = mirror.name(), error = %e, "mirror upload failed");
                    None
                }
            },
            None => None,
        };

        Ok(ArtifactRef { primary, mirror })
    }

    /// Read an artifact back, falling back to the mirror copy.
    pub async fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StorageError> {
        match self.primary.get(&artifact.primary).await {
            Ok(bytes) => Ok(bytes),
            Err(primary_err) => match (&self.mirror, &artifact.mirror) {
                (Some(mirror), Some(uri)) => {
                    warn!(uri = %artifact.primary, error = %primary_err, "primary read failed, trying mirror");
                    mirror.get(uri).await
                }
                _ => Err(primary_err),
            },
        }
    }
}

fn backend(target: &StorageTarget, timeout: Duration) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    Ok(match target.backend {
        StorageBackend::Local => Arc::new(LocalStorage::new(&target.root)),
        StorageBackend::Http => {
            let base_url = target.base_url.as_deref().ok_or_else(|| {
                StorageError::NotConfigured("http storage requires base_url".into())
            })?;
            Arc::new(HttpStorage::new(base_url, timeout))
        }
    })
}
