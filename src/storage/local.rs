use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use super::{ObjectStorage, StorageError, validate_key};
use crate::workspace::temp_path;

const SCHEME: &str = "local:";

/// Objects as files under a root directory; URIs look like `local:<key>`.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let key = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| StorageError::ForeignUri(uri.to_string()))?;
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Readers never see a partial object.
        let tmp = temp_path(&path);
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(format!("{SCHEME}{key}"))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(uri)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(uri.into())),
            Err(e) => Err(e.into()),
        }
    }
}
