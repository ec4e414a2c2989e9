//! In-process [`DocumentIndex`] with simple term-overlap scoring.
//!
//! A hit's score is the fraction of distinct query terms that occur in the
//! document's searchable text, title, or url. Documents scoring zero are not
//! returned. Ties keep insertion order.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{DocumentIndex, SearchRequest};
use crate::error::IndexError;
use crate::models::{Document, SearchHit};

pub struct LocalIndex {
    docs: RwLock<Vec<Document>>,
    path: Option<PathBuf>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            path: None,
        }
    }

    pub fn with_documents(docs: Vec<Document>) -> Self {
        Self {
            docs: RwLock::new(docs),
            path: None,
        }
    }

    /// Load the corpus from `path` (a JSON array of documents). A missing file
    /// starts an empty corpus; upserts are written back to the same file.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let docs = match std::fs::read_to_string(path) {
            Ok(data) if data.trim().is_empty() => Vec::new(),
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                anyhow::anyhow!("Failed to parse local index {}: {}", path.display(), e)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read local index {}: {}",
                    path.display(),
                    e
                ))
            }
        };

        Ok(Self {
            docs: RwLock::new(docs),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Document> {
        match self.docs.read() {
            Ok(docs) => docs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for LocalIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = text
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn score(doc: &Document, query_terms: &[String]) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {} {}", doc.searchable_text, doc.title, doc.url).to_lowercase();
    let matched = query_terms
        .iter()
        .filter(|t| haystack.contains(t.as_str()))
        .count();
    matched as f64 / query_terms.len() as f64
}

#[async_trait]
impl DocumentIndex for LocalIndex {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, IndexError> {
        let query_terms = terms(&request.query);
        let mut hits: Vec<SearchHit> = self
            .snapshot()
            .into_iter()
            .filter_map(|doc| {
                let s = score(&doc, &query_terms);
                (s > 0.0).then_some(SearchHit { document: doc, score: s })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn upsert(&self, documents: &[Document]) -> Result<(), IndexError> {
        let serialized = {
            let mut docs = self
                .docs
                .write()
                .map_err(|_| IndexError::Decode("local index lock poisoned".to_string()))?;
            for doc in documents {
                match docs.iter().position(|d| d.id == doc.id) {
                    Some(pos) => docs[pos] = doc.clone(),
                    None => docs.push(doc.clone()),
                }
            }
            match &self.path {
                Some(_) => Some(
                    serde_json::to_string_pretty(&*docs)
                        .map_err(|e| IndexError::Decode(e.to_string()))?,
                ),
                None => None,
            }
        };

        if let (Some(path), Some(json)) = (&self.path, serialized) {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|source| IndexError::Io {
                        path: dir.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(path, json)
                .await
                .map_err(|source| IndexError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
