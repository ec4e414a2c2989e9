//! Language-model providers and provider selection.
//!
//! Defines the [`LanguageModel`] trait and three HTTP implementations:
//! - **[`openai::OpenAiModel`]**: OpenAI Responses API.
//! - **[`groq::GroqModel`]**: Groq's OpenAI-compatible chat completions.
//! - **[`anthropic::AnthropicModel`]**: Anthropic Messages API.
//!
//! # Provider Selection
//!
//! [`ProviderChain`] holds the providers in rank order (`ai.provider_order`,
//! default openai → groq → anthropic). On every call the first provider whose
//! credentials are configured answers; the chain is never cached, so a key
//! added to the config takes effect on restart without code changes.
//!
//! # Modes
//!
//! [`LanguageModel::generate`] returns the whole answer.
//! [`LanguageModel::generate_stream`] yields fragments whose concatenation is
//! the same text; only the delivery cadence differs.
//!
//! # Timeouts
//!
//! Each provider's HTTP client enforces `ai.timeout_secs` as a total request
//! deadline (including a streamed body) and `ai.connect_timeout_secs` for
//! connection setup. An expired deadline surfaces as
//! [`GenerationError::Timeout`].

pub mod anthropic;
pub mod groq;
pub mod openai;
mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AiConfig;
use crate::error::GenerationError;
use crate::models::{Message, Role};

/// Ordered text fragments from incremental generation.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// The grounding instruction sent as the system message.
pub const SYSTEM_PROMPT: &str = "Du er en hjælpsom udlejningsassistent. Når en bruger spørger til boliger, \
skal du svare på dansk og kun bruge konteksten nedenfor. Hvis du ikke kan finde svar i materialet, \
skal du sige det tydeligt. Besvar også spørgsmål om depositum, inflytningsdatoer og kontaktmuligheder, \
hvis oplysningerne findes i teksterne.";

/// System message for connectivity checks.
pub const PING_SYSTEM_PROMPT: &str = "Besvar kort på dansk og nævn hvis du mangler kontekst.";

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub reasoning_effort: String,
    pub verbosity: String,
}

impl GenerationOptions {
    pub fn from_config(ai: &AiConfig) -> Self {
        Self {
            max_output_tokens: ai.max_output_tokens,
            temperature: ai.temperature,
            reasoning_effort: ai.reasoning_effort.clone(),
            verbosity: ai.verbosity.clone(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&AiConfig::default())
    }
}

/// Messages plus sampling options for one generation call.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
}

impl Prompt {
    /// The two-message grounded prompt: fixed instruction, then the question
    /// with the assembled context.
    pub fn grounded(query: &str, context: &str, options: GenerationOptions) -> Self {
        let user = format!(
            "Spørgsmål: {}\n\nRelevant indhold fra websitet:\n{}\n\nGiv et fyldestgørende svar ud fra oplysningerne.",
            query, context
        );
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: Role::User,
                    content: user,
                },
            ],
            options,
        }
    }

    /// A short prompt used to check that the active provider answers.
    pub fn ping(message: &str, mut options: GenerationOptions) -> Self {
        options.max_output_tokens = options.max_output_tokens.min(200);
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: PING_SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: Role::User,
                    content: message.to_string(),
                },
            ],
            options,
        }
    }

    /// The system instruction, if any.
    pub fn system(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Every non-system message, in order.
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// A language-model backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider identifier (`"openai"`, `"groq"`, `"anthropic"`).
    fn name(&self) -> &str;

    /// Model identifier sent upstream.
    fn model(&self) -> &str;

    /// Whether credentials are configured.
    fn is_available(&self) -> bool;

    /// Complete answer in one piece.
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError>;

    /// Answer as ordered fragments. Dropping the stream releases the
    /// upstream connection.
    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, GenerationError>;
}

/// Ranked providers; the first available one wins.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn LanguageModel>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn LanguageModel>>) -> Self {
        Self { providers }
    }

    /// Build the chain in `ai.provider_order`.
    pub fn from_config(ai: &AiConfig) -> anyhow::Result<Self> {
        let client = http_client(ai)?;
        let mut providers: Vec<Arc<dyn LanguageModel>> = Vec::new();
        for name in &ai.provider_order {
            let provider: Arc<dyn LanguageModel> = match name.as_str() {
                "openai" => Arc::new(openai::OpenAiModel::new(&ai.openai, client.clone())),
                "groq" => Arc::new(groq::GroqModel::new(&ai.groq, client.clone())),
                "anthropic" => Arc::new(anthropic::AnthropicModel::new(&ai.anthropic, client.clone())),
                other => anyhow::bail!("Unknown AI provider: {}", other),
            };
            providers.push(provider);
        }
        Ok(Self::new(providers))
    }

    /// The first provider with credentials, evaluated now.
    pub fn active(&self) -> Option<Arc<dyn LanguageModel>> {
        self.providers.iter().find(|p| p.is_available()).cloned()
    }

    pub fn providers(&self) -> &[Arc<dyn LanguageModel>] {
        &self.providers
    }

    /// Per-provider availability, in rank order.
    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            active: self.active().map(|p| p.name().to_string()),
            providers: self
                .providers
                .iter()
                .map(|p| ProviderStatus {
                    name: p.name().to_string(),
                    model: p.model().to_string(),
                    available: p.is_available(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderSummary {
    pub active: Option<String>,
    pub providers: Vec<ProviderStatus>,
}

fn http_client(ai: &AiConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(ai.timeout_secs))
        .connect_timeout(Duration::from_secs(ai.connect_timeout_secs))
        .build()?)
}

/// Send a request and classify non-success statuses.
pub(crate) async fn send(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, GenerationError> {
    let resp = request
        .send()
        .await
        .map_err(|e| GenerationError::from_reqwest(provider, e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(GenerationError::from_status(provider, status.as_u16(), body))
}

/// Reads the JSON body of a successful response.
pub(crate) async fn read_json(
    provider: &str,
    resp: reqwest::Response,
) -> Result<serde_json::Value, GenerationError> {
    resp.json()
        .await
        .map_err(|e| GenerationError::from_reqwest(provider, e))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use futures_util::stream::{self, StreamExt};

    /// Provider stub answering with fixed fragments.
    pub struct StaticModel {
        pub name: &'static str,
        pub available: bool,
        pub fragments: Vec<&'static str>,
        pub error: Option<GenerationError>,
    }

    impl StaticModel {
        pub fn answering(name: &'static str, fragments: Vec<&'static str>) -> Self {
            Self {
                name,
                available: true,
                fragments,
                error: None,
            }
        }

        pub fn unavailable(name: &'static str) -> Self {
            Self {
                name,
                available: false,
                fragments: Vec::new(),
                error: None,
            }
        }

        pub fn failing(name: &'static str, error: GenerationError) -> Self {
            Self {
                name,
                available: true,
                fragments: Vec::new(),
                error: Some(error),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for StaticModel {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "static"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(self.fragments.concat()),
            }
        }

        async fn generate_stream(&self, _prompt: &Prompt) -> Result<FragmentStream, GenerationError> {
            if let Some(e) = &self.error {
                return Err(e.clone());
            }
            let items: Vec<Result<String, GenerationError>> =
                self.fragments.iter().map(|f| Ok(f.to_string())).collect();
            Ok(stream::iter(items).boxed())
        }
    }
}
