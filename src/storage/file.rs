//! Flat-file [`StorageAdapter`]: one pretty-printed JSON array on disk.
//!
//! A missing file reads as an empty list. Parent directories are created on
//! the first write. A file that exists but cannot be parsed is reported as an
//! error rather than silently overwritten.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{upsert_capped, StorageAdapter};
use crate::error::StorageError;
use crate::models::SiteIndexMetadata;

pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<SiteIndexMetadata>, StorageError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parsed: Vec<SiteIndexMetadata> = serde_json::from_str(&data)?;
        Ok(parsed.into_iter().map(SiteIndexMetadata::normalized).collect())
    }

    async fn write_all(&self, indexes: &[SiteIndexMetadata]) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let json = serde_json::to_string_pretty(indexes)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn get_indexes(&self) -> Result<Vec<SiteIndexMetadata>, StorageError> {
        self.read_all().await
    }

    async fn get_index(&self, namespace: &str) -> Result<Option<SiteIndexMetadata>, StorageError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|i| i.namespace == namespace))
    }

    async fn save_index(&self, index: &SiteIndexMetadata) -> Result<(), StorageError> {
        let current = self.read_all().await?;
        let updated = upsert_capped(current, index.clone().normalized());
        self.write_all(&updated).await
    }

    async fn delete_index(&self, namespace: &str) -> Result<(), StorageError> {
        let mut current = self.read_all().await?;
        current.retain(|i| i.namespace != namespace);
        self.write_all(&current).await
    }
}
