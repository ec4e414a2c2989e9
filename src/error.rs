//! Classified failure types for the parts of the pipeline that degrade
//! instead of failing.
//!
//! Startup and CLI plumbing use `anyhow`; these enums exist where a caller
//! must decide what a failure means for the user.

use std::path::PathBuf;

/// Failure inside a [`StorageAdapter`](crate::storage::StorageAdapter) backend.
///
/// Never surfaces through [`Storage`](crate::storage::Storage); it is logged
/// and reported through [`StorageOutcome`](crate::storage::StorageOutcome).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid stored data: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Remote(err.to_string())
    }
}

/// Failure talking to the external document index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("search index request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("search index returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("unexpected search index response: {0}")]
    Decode(String),

    #[error("search index not configured: {0}")]
    NotConfigured(String),

    #[error("local index I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure producing an answer with a language model.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("no language model provider is configured")]
    NoProvider,

    #[error("{provider} rejected the credentials ({status})")]
    Auth { provider: String, status: u16 },

    #[error("{provider} rate limit reached")]
    RateLimited { provider: String },

    #[error("{provider} API error {status}: {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request timed out")]
    Timeout { provider: String },

    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} returned an empty answer")]
    EmptyResponse { provider: String },
}

impl GenerationError {
    pub(crate) fn from_status(provider: &str, status: u16, body: String) -> Self {
        match status {
            401 | 403 => GenerationError::Auth {
                provider: provider.to_string(),
                status,
            },
            429 => GenerationError::RateLimited {
                provider: provider.to_string(),
            },
            _ => GenerationError::Upstream {
                provider: provider.to_string(),
                status,
                body,
            },
        }
    }

    pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout {
                provider: provider.to_string(),
            }
        } else {
            GenerationError::Transport {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// The text shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Auth { provider, .. } => format!(
                "Fejl: {} API-godkendelse mislykkedes. Kontrollér din API-nøgle.",
                display_name(provider)
            ),
            GenerationError::RateLimited { provider } => format!(
                "Fejl: {} API-rate limit er nået. Prøv igen senere.",
                display_name(provider)
            ),
            other => format!("Fejl under generering af svar: {}", other),
        }
    }
}

fn display_name(provider: &str) -> &str {
    match provider {
        "openai" => "OpenAI",
        "groq" => "Groq",
        "anthropic" => "Anthropic",
        other => other,
    }
}
