//! Core data models used throughout Lejechat.
//!
//! These types represent the indexed documents, the per-site metadata
//! records, and the request/response shapes that flow through the query
//! pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::quick_prompts::normalize_quick_prompts;

/// An indexed page of an imported website.
///
/// Documents are immutable; re-importing a site produces a new namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub namespace: String,
    /// Short indexable text. Always contains the namespace literally.
    pub searchable_text: String,
    /// Longer copy of the page body, preferred when building context.
    #[serde(default)]
    pub full_content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub crawl_date: String,
}

/// A document returned by the external index together with its score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub score: f64,
}

/// A citation shown to the user next to an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Descriptive metadata captured from the site's homepage at import time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SiteMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub og_image: Option<String>,
    #[serde(default)]
    pub quick_prompts: Vec<String>,
}

/// One imported website, keyed by namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteIndexMetadata {
    pub url: String,
    pub namespace: String,
    /// Public chatbot id. Empty on records written before slugs existed.
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub pages_crawled: usize,
    pub created_at: String,
    #[serde(default)]
    pub metadata: SiteMetadata,
}

impl SiteIndexMetadata {
    /// Apply the invariants every stored record must satisfy: a non-empty
    /// slug and exactly three quick prompts.
    pub fn normalized(mut self) -> Self {
        if self.slug.trim().is_empty() {
            self.slug = self.namespace.clone();
        }
        let prompts = if self.metadata.quick_prompts.is_empty() {
            None
        } else {
            Some(self.metadata.quick_prompts.as_slice())
        };
        self.metadata.quick_prompts = normalize_quick_prompts(prompts).to_vec();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// `developer`, `tool`, and any role added to the chat format later.
    #[serde(other)]
    Other,
}

/// A chat turn as sent by clients. Never persisted server-side.
///
/// `content` accepts a string, `null`, or an array of content parts; text
/// parts are joined with newlines and other parts are dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "content_text")]
    pub content: String,
}

fn content_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(_) => part.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(_) => String::new(),
    })
}

/// Content of the last `user` message, if any.
pub fn last_user_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
