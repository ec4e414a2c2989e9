//! Upstash Search REST client.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | search | `POST {url}/search/{index}` `{"query", "topK", "reranking"}` |
//! | upsert | `POST {url}/upsert/{index}` `[{"id", "content", "metadata"}]` |
//!
//! Stored documents split into a searchable `content` part (`text`, `url`,
//! `title`) and a non-searchable `metadata` part that carries the namespace
//! and the long-form page copy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{DocumentIndex, SearchRequest};
use crate::error::IndexError;
use crate::models::{Document, SearchHit};

pub struct UpstashSearchIndex {
    url: String,
    token: String,
    index_name: String,
    client: reqwest::Client,
}

impl UpstashSearchIndex {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        index_name: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            index_name: index_name.into(),
            client,
        })
    }

    async fn post(&self, op: &str, body: &serde_json::Value) -> Result<reqwest::Response, IndexError> {
        let resp = self
            .client
            .post(format!("{}/{}/{}", self.url, op, self.index_name))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StoredContent {
    #[serde(default)]
    text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StoredMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, rename = "sourceURL", skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crawl_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    full_content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    #[serde(default)]
    content: StoredContent,
    #[serde(default)]
    metadata: StoredMetadata,
    #[serde(default, skip_serializing)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<StoredDocument>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl StoredDocument {
    fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            content: StoredContent {
                text: doc.searchable_text.clone(),
                url: doc.url.clone(),
                title: doc.title.clone(),
            },
            metadata: StoredMetadata {
                namespace: Some(doc.namespace.clone()),
                title: Some(doc.title.clone()),
                page_title: Some(doc.title.clone()),
                url: Some(doc.url.clone()),
                source_url: Some(doc.url.clone()),
                description: Some(doc.description.clone()),
                crawl_date: Some(doc.crawl_date.clone()),
                full_content: Some(doc.full_content.clone()),
            },
            score: None,
        }
    }

    fn into_hit(self) -> SearchHit {
        let StoredDocument {
            id,
            content,
            metadata,
            score,
        } = self;

        let title = non_empty(metadata.title)
            .or_else(|| non_empty(metadata.page_title))
            .or_else(|| non_empty(Some(content.title)))
            .unwrap_or_default();
        let url = non_empty(metadata.url)
            .or_else(|| non_empty(metadata.source_url))
            .or_else(|| non_empty(Some(content.url)))
            .unwrap_or_default();

        SearchHit {
            document: Document {
                id,
                namespace: metadata.namespace.unwrap_or_default(),
                searchable_text: content.text,
                full_content: metadata.full_content.unwrap_or_default(),
                url,
                title,
                description: metadata.description.unwrap_or_default(),
                crawl_date: metadata.crawl_date.unwrap_or_default(),
            },
            score: score.unwrap_or(0.0),
        }
    }
}

#[async_trait]
impl DocumentIndex for UpstashSearchIndex {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, IndexError> {
        let body = json!({
            "query": request.query,
            "topK": request.limit,
            "reranking": request.reranking,
        });

        let resp = self.post("search", &body).await?;
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| IndexError::Decode(e.to_string()))?;

        Ok(parsed
            .result
            .into_iter()
            .map(StoredDocument::into_hit)
            .collect())
    }

    async fn upsert(&self, documents: &[Document]) -> Result<(), IndexError> {
        let batch: Vec<StoredDocument> = documents.iter().map(StoredDocument::from_document).collect();
        let body = serde_json::to_value(&batch).map_err(|e| IndexError::Decode(e.to_string()))?;
        self.post("upsert", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_maps_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/lejechat"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({ "query": "depositum ns-1", "topK": 100, "reranking": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {
                        "id": "ns-1-0",
                        "score": 0.91,
                        "content": { "text": "namespace:ns-1 Bolig depositum", "url": "https://a.dk/bolig", "title": "Bolig" },
                        "metadata": { "namespace": "ns-1", "pageTitle": "Bolig side", "sourceURL": "https://a.dk/bolig", "fullContent": "Langt indhold" }
                    },
                    {
                        "id": "other-0",
                        "score": 0.5,
                        "content": { "text": "unrelated" }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let index = UpstashSearchIndex::new(server.uri(), "tok", "lejechat").unwrap();
        let hits = index
            .search(&SearchRequest {
                query: "depositum ns-1".to_string(),
                limit: 100,
                reranking: true,
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        let first = &hits[0].document;
        assert_eq!(first.namespace, "ns-1");
        assert_eq!(first.title, "Bolig side");
        assert_eq!(first.url, "https://a.dk/bolig");
        assert_eq!(first.full_content, "Langt indhold");
        assert!((hits[0].score - 0.91).abs() < 1e-9);

        // hits without metadata carry an empty namespace, which never matches
        assert_eq!(hits[1].document.namespace, "");
    }

    #[tokio::test]
    async fn test_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let index = UpstashSearchIndex::new(server.uri(), "tok", "lejechat").unwrap();
        let err = index
            .search(&SearchRequest {
                query: "x".to_string(),
                limit: 1,
                reranking: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_upsert_sends_namespace_in_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upsert/lejechat"))
            .and(body_partial_json(json!([
                { "id": "ns-1-0", "metadata": { "namespace": "ns-1", "fullContent": "body" } }
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "Success" })))
            .expect(1)
            .mount(&server)
            .await;

        let index = UpstashSearchIndex::new(server.uri(), "tok", "lejechat").unwrap();
        let doc = Document {
            id: "ns-1-0".to_string(),
            namespace: "ns-1".to_string(),
            searchable_text: "namespace:ns-1 body".to_string(),
            full_content: "body".to_string(),
            url: "https://a.dk".to_string(),
            title: "A".to_string(),
            description: String::new(),
            crawl_date: "2024-01-01T00:00:00Z".to_string(),
        };
        index.upsert(&[doc]).await.unwrap();
    }
}
