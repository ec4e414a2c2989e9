//! Namespace-scoped retrieval with a fallback ladder.
//!
//! The document index is shared by every imported site, and its structured
//! filtering cannot be relied on, so every tier filters hits to the target
//! namespace by exact match on the stored namespace.
//!
//! ```text
//! Tier 1  search("{query} {namespace}")   ── non-empty ──▶ done (Boosted)
//!             │ empty
//!             ▼
//! Tier 2  search("{namespace}")            ── empty ──────▶ done (Empty)
//!             │ non-empty
//!             ▼
//! Tier 3  keep hits whose text/title/url contains the query
//!             │ non-empty ──▶ done (LexicalFilter)
//!             │ empty     ──▶ unfiltered Tier 2 hits (NamespaceFallback)
//! ```
//!
//! The result is empty only when the namespace has no indexed documents.

use std::sync::Arc;

use crate::error::IndexError;
use crate::index::{DocumentIndex, SearchRequest};
use crate::models::SearchHit;

/// Which rung of the ladder produced a [`Retrieval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Tier 1: the namespace-boosted query matched.
    Boosted,
    /// Tier 3: the namespace listing filtered by the query text.
    LexicalFilter,
    /// Tier 3 found nothing; the whole Tier 2 listing is returned.
    NamespaceFallback,
    /// The namespace has no documents.
    Empty,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub hits: Vec<SearchHit>,
    pub tier: Tier,
}

pub struct NamespaceRetriever {
    index: Arc<dyn DocumentIndex>,
    max_results: usize,
}

impl NamespaceRetriever {
    pub fn new(index: Arc<dyn DocumentIndex>, max_results: usize) -> Self {
        Self { index, max_results }
    }

    /// Run the ladder for `query` within `namespace`.
    ///
    /// Index failures are logged and count as an empty tier.
    pub async fn retrieve(&self, query: &str, namespace: &str) -> Retrieval {
        let boosted = self
            .search_namespace(&format!("{} {}", query, namespace), namespace)
            .await;
        tracing::debug!(namespace, hits = boosted.len(), "tier 1 (boosted)");
        if !boosted.is_empty() {
            return Retrieval {
                hits: boosted,
                tier: Tier::Boosted,
            };
        }

        let listing = self.search_namespace(namespace, namespace).await;
        tracing::debug!(namespace, hits = listing.len(), "tier 2 (namespace listing)");
        if listing.is_empty() {
            return Retrieval {
                hits: Vec::new(),
                tier: Tier::Empty,
            };
        }

        let needle = query.to_lowercase();
        let filtered: Vec<SearchHit> = listing
            .iter()
            .filter(|hit| mentions(hit, &needle))
            .cloned()
            .collect();
        tracing::debug!(namespace, hits = filtered.len(), "tier 3 (lexical filter)");

        if filtered.is_empty() {
            Retrieval {
                hits: listing,
                tier: Tier::NamespaceFallback,
            }
        } else {
            Retrieval {
                hits: filtered,
                tier: Tier::LexicalFilter,
            }
        }
    }

    async fn search_namespace(&self, query: &str, namespace: &str) -> Vec<SearchHit> {
        let request = SearchRequest {
            query: query.to_string(),
            limit: self.max_results,
            reranking: true,
        };
        match self.index.search(&request).await {
            Ok(hits) => hits
                .into_iter()
                .filter(|hit| hit.document.namespace == namespace)
                .collect(),
            Err(e) => {
                log_index_error(namespace, &e);
                Vec::new()
            }
        }
    }
}

fn log_index_error(namespace: &str, err: &IndexError) {
    tracing::warn!(namespace, error = %err, "search failed");
}

fn mentions(hit: &SearchHit, needle: &str) -> bool {
    let doc = &hit.document;
    doc.searchable_text.to_lowercase().contains(needle)
        || doc.title.to_lowercase().contains(needle)
        || doc.url.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Index stub that answers each call from a queue and records queries.
    struct ScriptedIndex {
        responses: Mutex<Vec<Result<Vec<SearchHit>, IndexError>>>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedIndex {
        fn new(responses: Vec<Result<Vec<SearchHit>, IndexError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentIndex for ScriptedIndex {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, IndexError> {
            self.queries.lock().unwrap().push(request.query.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                responses.remove(0)
            }
        }

        async fn upsert(&self, _documents: &[Document]) -> Result<(), IndexError> {
            Ok(())
        }
    }

    fn hit(id: &str, ns: &str, text: &str) -> SearchHit {
        SearchHit {
            document: Document {
                id: id.to_string(),
                namespace: ns.to_string(),
                searchable_text: format!("namespace:{} {}", ns, text),
                full_content: String::new(),
                url: format!("https://example.com/{}", id),
                title: id.to_string(),
                description: String::new(),
                crawl_date: String::new(),
            },
            score: 1.0,
        }
    }

    fn ids(r: &Retrieval) -> Vec<&str> {
        r.hits.iter().map(|h| h.document.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_tier_one_filters_foreign_namespaces() {
        let index = ScriptedIndex::new(vec![Ok(vec![
            hit("a", "ns", "depositum"),
            hit("b", "ns-other", "depositum"),
            hit("c", "ns-1", "depositum"),
        ])]);
        let retriever = NamespaceRetriever::new(index.clone(), 100);

        let r = retriever.retrieve("depositum", "ns").await;
        assert_eq!(r.tier, Tier::Boosted);
        assert_eq!(ids(&r), vec!["a"]);
        assert_eq!(index.queries(), vec!["depositum ns"]);
    }

    #[tokio::test]
    async fn test_tier_two_only_when_tier_one_empty() {
        let index = ScriptedIndex::new(vec![
            Ok(vec![hit("x", "elsewhere", "depositum")]),
            Ok(vec![hit("a", "ns", "Depositum er 3 måneders leje"), hit("b", "ns", "Kontakt")]),
        ]);
        let retriever = NamespaceRetriever::new(index.clone(), 100);

        let r = retriever.retrieve("depositum", "ns").await;
        assert_eq!(r.tier, Tier::LexicalFilter);
        assert_eq!(ids(&r), vec!["a"]);
        assert_eq!(index.queries(), vec!["depositum ns", "ns"]);
    }

    #[tokio::test]
    async fn test_unfiltered_fallback_when_tier_three_empty() {
        let index = ScriptedIndex::new(vec![
            Ok(vec![]),
            Ok(vec![hit("a", "ns", "Kontakt"), hit("b", "ns", "Om os")]),
        ]);
        let retriever = NamespaceRetriever::new(index, 100);

        let r = retriever.retrieve("Hvad er depositum?", "ns").await;
        assert_eq!(r.tier, Tier::NamespaceFallback);
        assert_eq!(ids(&r), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_lexical_filter_is_case_insensitive_over_url_and_title() {
        let index = ScriptedIndex::new(vec![
            Ok(vec![]),
            Ok(vec![hit("Priser", "ns", "x"), hit("other", "ns", "y")]),
        ]);
        let retriever = NamespaceRetriever::new(index, 100);

        let r = retriever.retrieve("PRISER", "ns").await;
        assert_eq!(r.tier, Tier::LexicalFilter);
        assert_eq!(ids(&r), vec!["Priser"]);
    }

    #[tokio::test]
    async fn test_empty_namespace() {
        let index = ScriptedIndex::new(vec![Ok(vec![]), Ok(vec![hit("z", "other", "q")])]);
        let retriever = NamespaceRetriever::new(index.clone(), 100);

        let r = retriever.retrieve("anything", "empty-ns").await;
        assert_eq!(r.tier, Tier::Empty);
        assert!(r.hits.is_empty());
        assert_eq!(index.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_index_errors_degrade_to_next_tier() {
        let index = ScriptedIndex::new(vec![
            Err(IndexError::Decode("boom".to_string())),
            Ok(vec![hit("a", "ns", "x")]),
        ]);
        let retriever = NamespaceRetriever::new(index, 100);

        let r = retriever.retrieve("q", "ns").await;
        assert_eq!(r.tier, Tier::NamespaceFallback);
        assert_eq!(ids(&r), vec!["a"]);
    }
}
