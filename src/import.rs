//! Import of already-crawled pages.
//!
//! Crawling is done elsewhere; this takes the crawler's JSON output for one
//! site, turns every page into a [`Document`] under a fresh namespace,
//! upserts the documents in batches, and records the site's
//! [`SiteIndexMetadata`].
//!
//! A storage failure is logged and does not fail the import: the documents
//! are already searchable by namespace at that point.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::index::DocumentIndex;
use crate::models::{truncate_chars, Document, SiteIndexMetadata, SiteMetadata};
use crate::quick_prompts::DEFAULT_QUICK_PROMPTS;
use crate::storage::Storage;

/// Documents per upsert call.
pub const UPSERT_BATCH_SIZE: usize = 10;
pub const SEARCHABLE_TEXT_LIMIT: usize = 1000;
pub const FULL_CONTENT_LIMIT: usize = 5000;

const UNTITLED: &str = "Ingen titel";

/// One page as produced by the crawler.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CrawledPage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub og_description: Option<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: Option<String>,
    pub favicon: Option<String>,
    pub og_image: Option<String>,
    #[serde(rename = "og:image")]
    pub og_image_tag: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl CrawledPage {
    pub fn page_url(&self) -> &str {
        present(&self.metadata.source_url)
            .or_else(|| present(&self.url))
            .unwrap_or_default()
    }

    pub fn body(&self) -> &str {
        present(&self.markdown)
            .or_else(|| present(&self.content))
            .unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        present(&self.metadata.title).unwrap_or(UNTITLED)
    }

    pub fn description(&self) -> &str {
        present(&self.metadata.description)
            .or_else(|| present(&self.metadata.og_description))
            .unwrap_or_default()
    }

    fn og_image(&self) -> Option<String> {
        present(&self.metadata.og_image)
            .or_else(|| present(&self.metadata.og_image_tag))
            .map(str::to_string)
    }
}

/// Everything needed to import one crawled site.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub url: String,
    pub pages: Vec<CrawledPage>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub namespace: String,
    pub documents: usize,
    pub batches: usize,
    pub metadata_saved: bool,
}

/// Namespace for a site imported at `millis`: hostname with dots replaced by
/// dashes, then the timestamp.
pub fn namespace_for(url: &str, millis: i64) -> Result<String> {
    let parsed = url::Url::parse(url).with_context(|| format!("Invalid site URL: {}", url))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .with_context(|| format!("Site URL has no host: {}", url))?;
    Ok(format!("{}-{}", host.replace('.', "-"), millis))
}

/// Build the indexed document for the `position`-th page.
pub fn document_from_page(
    page: &CrawledPage,
    namespace: &str,
    position: usize,
    crawl_date: &str,
) -> Document {
    let body = page.body();
    let title = page.title();
    let description = page.description();
    let searchable = format!("namespace:{} {} {} {}", namespace, title, description, body);

    Document {
        id: format!("{}-{}", namespace, position),
        namespace: namespace.to_string(),
        searchable_text: truncate_chars(&searchable, SEARCHABLE_TEXT_LIMIT).to_string(),
        full_content: truncate_chars(body, FULL_CONTENT_LIMIT).to_string(),
        url: page.page_url().to_string(),
        title: title.to_string(),
        description: description.to_string(),
        crawl_date: crawl_date.to_string(),
    }
}

/// The page whose URL equals the import URL, ignoring a trailing slash, or
/// the first page.
pub fn find_homepage<'a>(url: &str, pages: &'a [CrawledPage]) -> Option<&'a CrawledPage> {
    let wanted = url.trim_end_matches('/');
    pages
        .iter()
        .find(|p| p.page_url().trim_end_matches('/') == wanted)
        .or_else(|| pages.first())
}

/// Read crawler output: a JSON array of pages or an object with a `data`
/// array.
pub fn load_pages(path: &Path) -> Result<Vec<CrawledPage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pages file: {}", path.display()))?;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PagesFile {
        List(Vec<CrawledPage>),
        Crawl { data: Vec<CrawledPage> },
    }

    let parsed: PagesFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse pages file: {}", path.display()))?;
    Ok(match parsed {
        PagesFile::List(pages) => pages,
        PagesFile::Crawl { data } => data,
    })
}

pub async fn import_site(
    index: &dyn DocumentIndex,
    storage: &Storage,
    request: ImportRequest,
) -> Result<ImportReport> {
    if request.pages.is_empty() {
        bail!("No pages to import for {}", request.url);
    }

    let namespace = namespace_for(&request.url, request.timestamp.timestamp_millis())?;
    let created_at = request.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

    let documents: Vec<Document> = request
        .pages
        .iter()
        .enumerate()
        .map(|(i, page)| document_from_page(page, &namespace, i, &created_at))
        .collect();

    let mut batches = 0;
    for batch in documents.chunks(UPSERT_BATCH_SIZE) {
        index
            .upsert(batch)
            .await
            .with_context(|| format!("Failed to store documents for {}", namespace))?;
        batches += 1;
    }

    tracing::info!(
        namespace = %namespace,
        documents = documents.len(),
        batches,
        "documents indexed"
    );

    let homepage = find_homepage(&request.url, &request.pages);
    let metadata = SiteIndexMetadata {
        url: request.url.clone(),
        namespace: namespace.clone(),
        slug: namespace.clone(),
        pages_crawled: request.pages.len(),
        created_at,
        metadata: SiteMetadata {
            title: homepage.and_then(|p| present(&p.metadata.title).map(str::to_string)),
            description: homepage
                .map(|p| p.description().to_string())
                .filter(|d| !d.is_empty()),
            favicon: homepage.and_then(|p| present(&p.metadata.favicon).map(str::to_string)),
            og_image: homepage.and_then(CrawledPage::og_image),
            quick_prompts: DEFAULT_QUICK_PROMPTS.iter().map(|p| p.to_string()).collect(),
        },
    };

    let metadata_saved = storage.save_index(&metadata).await.is_saved();

    Ok(ImportReport {
        namespace,
        documents: documents.len(),
        batches,
        metadata_saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::local::LocalIndex;
    use crate::index::SearchRequest;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn page(url: &str, title: &str, body: &str) -> CrawledPage {
        CrawledPage {
            url: Some(url.to_string()),
            markdown: Some(body.to_string()),
            metadata: PageMetadata {
                title: Some(title.to_string()),
                ..PageMetadata::default()
            },
            ..CrawledPage::default()
        }
    }

    struct CountingIndex {
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DocumentIndex for CountingIndex {
        async fn search(
            &self,
            _request: &SearchRequest,
        ) -> Result<Vec<crate::models::SearchHit>, crate::error::IndexError> {
            Ok(Vec::new())
        }

        async fn upsert(&self, documents: &[Document]) -> Result<(), crate::error::IndexError> {
            self.batch_sizes.lock().unwrap().push(documents.len());
            Ok(())
        }
    }

    #[test]
    fn test_namespace_from_hostname() {
        assert_eq!(
            namespace_for("https://www.example.com/om-os", 1700000000000).unwrap(),
            "www-example-com-1700000000000"
        );
        assert!(namespace_for("not a url", 1).is_err());
    }

    #[test]
    fn test_document_truncation_keeps_namespace() {
        let body = "æ".repeat(8000);
        let doc = document_from_page(
            &page("https://a.dk/", "Forside", &body),
            "a-dk-1",
            3,
            "2024-01-01T00:00:00.000Z",
        );
        assert_eq!(doc.id, "a-dk-1-3");
        assert_eq!(doc.searchable_text.chars().count(), SEARCHABLE_TEXT_LIMIT);
        assert!(doc.searchable_text.starts_with("namespace:a-dk-1 Forside "));
        assert_eq!(doc.full_content.chars().count(), FULL_CONTENT_LIMIT);
    }

    #[test]
    fn test_page_fallbacks() {
        let raw = r#"{
            "url": "https://a.dk/x",
            "content": "plain body",
            "metadata": { "ogDescription": "og desc", "sourceURL": "https://a.dk/y", "og:image": "https://a.dk/i.png" }
        }"#;
        let p: CrawledPage = serde_json::from_str(raw).unwrap();
        assert_eq!(p.page_url(), "https://a.dk/y");
        assert_eq!(p.body(), "plain body");
        assert_eq!(p.title(), "Ingen titel");
        assert_eq!(p.description(), "og desc");
        assert_eq!(p.og_image().as_deref(), Some("https://a.dk/i.png"));
    }

    #[test]
    fn test_homepage_match_ignores_trailing_slash() {
        let pages = vec![
            page("https://a.dk/kontakt", "Kontakt", "x"),
            page("https://a.dk/", "Forside", "y"),
        ];
        assert_eq!(find_homepage("https://a.dk", &pages).unwrap().title(), "Forside");
        assert_eq!(
            find_homepage("https://b.dk", &pages).unwrap().title(),
            "Kontakt"
        );
    }

    #[test]
    fn test_load_pages_accepts_both_shapes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let list = tmp.path().join("list.json");
        std::fs::write(&list, r#"[{"url":"https://a.dk"}]"#).unwrap();
        let crawl = tmp.path().join("crawl.json");
        std::fs::write(&crawl, r#"{"success":true,"data":[{"url":"https://a.dk"},{"url":"https://a.dk/b"}]}"#).unwrap();

        assert_eq!(load_pages(&list).unwrap().len(), 1);
        assert_eq!(load_pages(&crawl).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_import_batches_and_records_metadata() {
        let index = CountingIndex {
            batch_sizes: Mutex::new(Vec::new()),
        };
        let storage = Storage::memory();
        let pages: Vec<CrawledPage> = (0..23)
            .map(|i| page(&format!("https://a.dk/{}", i), &format!("Side {}", i), "tekst"))
            .collect();
        let timestamp = Utc.timestamp_millis_opt(1700000000000).unwrap();

        let report = import_site(
            &index,
            &storage,
            ImportRequest {
                url: "https://a.dk/0".to_string(),
                pages,
                timestamp,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.namespace, "a-dk-1700000000000");
        assert_eq!(report.documents, 23);
        assert_eq!(*index.batch_sizes.lock().unwrap(), vec![10, 10, 3]);
        assert!(report.metadata_saved);

        let saved = storage.get_index("a-dk-1700000000000").await.unwrap();
        assert_eq!(saved.slug, "a-dk-1700000000000");
        assert_eq!(saved.pages_crawled, 23);
        assert_eq!(saved.metadata.title.as_deref(), Some("Side 0"));
        assert_eq!(saved.metadata.quick_prompts.len(), 3);
        assert_eq!(saved.created_at, "2023-11-14T22:13:20.000Z");
    }

    #[tokio::test]
    async fn test_imported_documents_are_searchable_by_namespace() {
        let index = LocalIndex::new();
        let storage = Storage::memory();
        let report = import_site(
            &index,
            &storage,
            ImportRequest {
                url: "https://udlejning.dk".to_string(),
                pages: vec![page("https://udlejning.dk/", "Forside", "Depositum er tre måneder")],
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();

        let hits = index
            .search(&SearchRequest {
                query: report.namespace.clone(),
                limit: 10,
                reranking: true,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.namespace, report.namespace);
    }

    #[tokio::test]
    async fn test_empty_import_is_rejected() {
        let err = import_site(
            &LocalIndex::new(),
            &Storage::memory(),
            ImportRequest {
                url: "https://a.dk".to_string(),
                pages: Vec::new(),
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("No pages"));
    }
}
