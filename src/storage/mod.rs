//! Persistence of per-site index metadata.
//!
//! The [`StorageAdapter`] trait defines the four operations every backend
//! provides. Three backends implement it:
//!
//! | Backend | Module | Selected when |
//! |---------|--------|---------------|
//! | Upstash Redis (REST) | [`redis`] | Redis URL and token are configured |
//! | Flat JSON file | [`file`] | default server-side fallback |
//! | Process memory | [`memory`] | `storage.backend = "memory"` (tests, demos) |
//!
//! Handlers never talk to a backend directly. They go through [`Storage`],
//! which normalizes records and turns every backend failure into a logged
//! warning plus an empty result, so bookkeeping problems cannot fail the
//! request that triggered them.
//!
//! # Layout
//!
//! All backends keep one ordered list, most recent first, capped at
//! [`MAX_INDEXES`]. The Redis backend additionally stores each record under
//! `lejechat:index:{namespace}` for point lookups.
//!
//! The list update is a read-modify-write without locking. Concurrent
//! writers may lose updates; the last writer wins.

pub mod file;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::models::SiteIndexMetadata;
use crate::quick_prompts::normalize_quick_prompts;

/// Maximum number of site records kept in the list.
pub const MAX_INDEXES: usize = 50;

/// Abstract metadata store.
///
/// Implementations return records already passed through
/// [`SiteIndexMetadata::normalized`].
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// All records, most recent first.
    async fn get_indexes(&self) -> Result<Vec<SiteIndexMetadata>, StorageError>;

    /// The record for `namespace`, if present.
    async fn get_index(&self, namespace: &str) -> Result<Option<SiteIndexMetadata>, StorageError>;

    /// Insert or replace the record for `index.namespace`.
    async fn save_index(&self, index: &SiteIndexMetadata) -> Result<(), StorageError>;

    /// Remove the record for `namespace`. Missing records are not an error.
    async fn delete_index(&self, namespace: &str) -> Result<(), StorageError>;
}

/// Upsert `index` into `list`: replace in place when the namespace exists,
/// otherwise insert at the head. The result is truncated to [`MAX_INDEXES`].
pub(crate) fn upsert_capped(
    mut list: Vec<SiteIndexMetadata>,
    index: SiteIndexMetadata,
) -> Vec<SiteIndexMetadata> {
    match list.iter().position(|i| i.namespace == index.namespace) {
        Some(pos) => list[pos] = index,
        None => list.insert(0, index),
    }
    list.truncate(MAX_INDEXES);
    list
}

/// Which backend a [`Storage`] was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Redis,
    File,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::File => "file",
            BackendKind::Memory => "memory",
        }
    }
}

/// Result of a write through [`Storage`].
#[derive(Debug)]
pub enum StorageOutcome {
    Saved,
    /// The targeted record does not exist.
    Missing,
    Failed(StorageError),
}

impl StorageOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, StorageOutcome::Saved)
    }
}

/// Failure-absorbing front for the active backend.
///
/// Constructed once at startup and shared by cloning (it is an `Arc`
/// inside).
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageAdapter>,
    kind: BackendKind,
}

impl Storage {
    pub fn new(backend: Arc<dyn StorageAdapter>, kind: BackendKind) -> Self {
        Self { backend, kind }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(memory::MemoryStorage::new()), BackendKind::Memory)
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub async fn try_get_indexes(&self) -> Result<Vec<SiteIndexMetadata>, StorageError> {
        self.backend.get_indexes().await
    }

    /// All records; empty when the backend fails.
    pub async fn get_indexes(&self) -> Vec<SiteIndexMetadata> {
        match self.backend.get_indexes().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(backend = self.kind.as_str(), error = %e, "failed to read indexes");
                Vec::new()
            }
        }
    }

    /// The record for `namespace`; `None` when absent or when the backend fails.
    pub async fn get_index(&self, namespace: &str) -> Option<SiteIndexMetadata> {
        match self.backend.get_index(namespace).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(backend = self.kind.as_str(), namespace, error = %e, "failed to read index");
                None
            }
        }
    }

    /// Look a record up by its public slug.
    pub async fn find_by_slug(&self, slug: &str) -> Option<SiteIndexMetadata> {
        self.get_indexes()
            .await
            .into_iter()
            .find(|index| index.slug == slug)
    }

    pub async fn save_index(&self, index: &SiteIndexMetadata) -> StorageOutcome {
        let normalized = index.clone().normalized();
        match self.backend.save_index(&normalized).await {
            Ok(()) => StorageOutcome::Saved,
            Err(e) => {
                tracing::warn!(
                    backend = self.kind.as_str(),
                    namespace = %normalized.namespace,
                    error = %e,
                    "index metadata not saved"
                );
                StorageOutcome::Failed(e)
            }
        }
    }

    pub async fn delete_index(&self, namespace: &str) -> StorageOutcome {
        match self.backend.delete_index(namespace).await {
            Ok(()) => StorageOutcome::Saved,
            Err(e) => {
                tracing::warn!(backend = self.kind.as_str(), namespace, error = %e, "index metadata not deleted");
                StorageOutcome::Failed(e)
            }
        }
    }

    /// Replace the quick prompts of an existing record.
    pub async fn update_quick_prompts(&self, namespace: &str, prompts: &[String]) -> StorageOutcome {
        let mut index = match self.backend.get_index(namespace).await {
            Ok(Some(index)) => index,
            Ok(None) => return StorageOutcome::Missing,
            Err(e) => {
                tracing::warn!(backend = self.kind.as_str(), namespace, error = %e, "failed to read index");
                return StorageOutcome::Failed(e);
            }
        };
        index.metadata.quick_prompts = normalize_quick_prompts(Some(prompts)).to_vec();
        self.save_index(&index).await
    }
}

/// Pick and construct the storage backend from configuration.
///
/// `auto` prefers Redis when both URL and token are present, otherwise the
/// JSON file. Requesting `redis` explicitly without credentials is an error.
pub fn select_backend(config: &StorageConfig) -> anyhow::Result<Storage> {
    let use_redis = match config.backend.as_str() {
        "auto" => config.has_redis(),
        "redis" => {
            if !config.has_redis() {
                anyhow::bail!(
                    "storage.backend = \"redis\" requires redis_url and redis_token \
                     (or UPSTASH_REDIS_REST_URL / UPSTASH_REDIS_REST_TOKEN)"
                );
            }
            true
        }
        _ => false,
    };

    let storage = if use_redis {
        let url = config.redis_url.clone().unwrap_or_default();
        let token = config.redis_token.clone().unwrap_or_default();
        Storage::new(
            Arc::new(redis::RedisStorage::new(url, token)?),
            BackendKind::Redis,
        )
    } else if config.backend == "memory" {
        Storage::memory()
    } else {
        let path = config.resolved_file_path();
        Storage::new(Arc::new(file::FileStorage::new(path)), BackendKind::File)
    };

    tracing::info!(backend = storage.kind().as_str(), "storage adapter initialized");
    Ok(storage)
}
