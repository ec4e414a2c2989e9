//! In-memory [`StorageAdapter`] for tests and single-process demos.
//!
//! Records live only as long as the process.

use async_trait::async_trait;
use std::sync::RwLock;

use super::{upsert_capped, StorageAdapter};
use crate::error::StorageError;
use crate::models::SiteIndexMetadata;

pub struct MemoryStorage {
    indexes: RwLock<Vec<SiteIndexMetadata>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get_indexes(&self) -> Result<Vec<SiteIndexMetadata>, StorageError> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes.iter().cloned().map(SiteIndexMetadata::normalized).collect())
    }

    async fn get_index(&self, namespace: &str) -> Result<Option<SiteIndexMetadata>, StorageError> {
        let indexes = self.indexes.read().map_err(|_| poisoned())?;
        Ok(indexes
            .iter()
            .find(|i| i.namespace == namespace)
            .cloned()
            .map(SiteIndexMetadata::normalized))
    }

    async fn save_index(&self, index: &SiteIndexMetadata) -> Result<(), StorageError> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        let current = std::mem::take(&mut *indexes);
        *indexes = upsert_capped(current, index.clone().normalized());
        Ok(())
    }

    async fn delete_index(&self, namespace: &str) -> Result<(), StorageError> {
        let mut indexes = self.indexes.write().map_err(|_| poisoned())?;
        indexes.retain(|i| i.namespace != namespace);
        Ok(())
    }
}
