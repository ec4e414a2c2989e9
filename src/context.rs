//! Turning retrieved hits into model context and display sources.
//!
//! Two caps apply in sequence: the top `max_sources_display` hits become the
//! citations shown to the user, and the top `max_context_docs` of those are
//! what the model actually reads. More sources can be shown than were
//! reasoned over; the model context stays bounded.

use crate::config::SearchConfig;
use crate::models::{truncate_chars, SearchHit, Source};

/// Separator between context blocks.
pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// One hit rendered through the block template.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Blocks fed to the model, best first, each already truncated.
    pub blocks: Vec<String>,
    /// The blocks joined with [`BLOCK_SEPARATOR`].
    pub context: String,
    pub sources: Vec<Source>,
}

impl AssembledContext {
    /// Whether the joined context is too short to answer from.
    pub fn is_degraded(&self, min_length: usize) -> bool {
        self.context.chars().count() < min_length
    }
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    if value.trim().is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

/// Render a hit through the fixed template, preferring the long-form copy.
pub fn render_block(hit: &SearchHit) -> ContextBlock {
    let doc = &hit.document;
    let title = or_placeholder(&doc.title, "Ingen titel");
    let body = if doc.full_content.is_empty() {
        doc.searchable_text.as_str()
    } else {
        doc.full_content.as_str()
    };

    let content = format!(
        "TITLE: {}\nDESCRIPTION: {}\nSOURCE: {}\n\n{}",
        title, doc.description, doc.url, body
    );

    ContextBlock {
        url: doc.url.clone(),
        title,
        description: doc.description.clone(),
        content,
        score: hit.score,
    }
}

pub struct ContextAssembler {
    max_sources_display: usize,
    max_context_docs: usize,
    max_context_length: usize,
    snippet_length: usize,
}

impl ContextAssembler {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            max_sources_display: config.max_sources_display,
            max_context_docs: config.max_context_docs.min(config.max_sources_display),
            max_context_length: config.max_context_length,
            snippet_length: config.snippet_length,
        }
    }

    pub fn assemble(&self, hits: &[SearchHit]) -> AssembledContext {
        let mut rendered: Vec<ContextBlock> = hits.iter().map(render_block).collect();
        // sort_by is stable: equal scores keep retrieval order
        rendered.sort_by(|a, b| b.score.total_cmp(&a.score));
        rendered.truncate(self.max_sources_display);

        let sources = rendered
            .iter()
            .map(|block| Source {
                url: block.url.clone(),
                title: block.title.clone(),
                snippet: format!("{}...", truncate_chars(&block.content, self.snippet_length)),
            })
            .collect();

        let blocks: Vec<String> = rendered
            .iter()
            .take(self.max_context_docs)
            .filter(|block| !block.content.is_empty())
            .map(|block| format!("{}...", truncate_chars(&block.content, self.max_context_length)))
            .collect();

        AssembledContext {
            context: blocks.join(BLOCK_SEPARATOR),
            blocks,
            sources,
        }
    }
}
