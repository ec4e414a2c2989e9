//! Boundary to the external document index.
//!
//! The index is one shared corpus across all imported sites. It is treated as
//! an opaque source of scored hits: Lejechat never ranks documents itself,
//! it only filters what the index returns (see [`crate::retriever`]).
//!
//! Two implementations:
//! - [`upstash::UpstashSearchIndex`]: Upstash Search over REST.
//! - [`local::LocalIndex`]: term-overlap scoring over an in-process corpus,
//!   optionally persisted to a JSON file. Used for tests and offline runs.

pub mod local;
pub mod upstash;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{Document, SearchHit};

/// One query against the shared corpus.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub reranking: bool,
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Scored hits for `request.query`, best first, at most `request.limit`.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, IndexError>;

    /// Insert or replace documents by id.
    async fn upsert(&self, documents: &[Document]) -> Result<(), IndexError>;
}

/// Construct the configured index.
pub fn open_index(config: &IndexConfig) -> anyhow::Result<Arc<dyn DocumentIndex>> {
    match config.provider.as_str() {
        "upstash" => {
            let url = config.url.clone().ok_or_else(|| {
                anyhow::anyhow!("index.url (or UPSTASH_SEARCH_REST_URL) is required for Upstash Search")
            })?;
            let token = config.token.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "index.token (or UPSTASH_SEARCH_REST_TOKEN) is required for Upstash Search"
                )
            })?;
            Ok(Arc::new(upstash::UpstashSearchIndex::new(
                url,
                token,
                config.index_name.clone(),
            )?))
        }
        "local" => {
            let index = match &config.local_path {
                Some(path) => local::LocalIndex::open(path)?,
                None => local::LocalIndex::new(),
            };
            Ok(Arc::new(index))
        }
        other => anyhow::bail!("Unknown index provider: {}", other),
    }
}
