//! Anthropic provider using the Messages API.
//!
//! The system instruction travels in the top-level `system` field; only user
//! and assistant turns go into `messages`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::sse::{self, SseStep};
use super::{FragmentStream, LanguageModel, Prompt};
use crate::config::ProviderConfig;
use crate::error::GenerationError;

const NAME: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicModel {
    api_key: Option<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            api_key: config.api_key.clone().filter(|_| config.has_key()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    async fn post(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::Response, GenerationError> {
        let key = self.api_key.as_deref().ok_or(GenerationError::NoProvider)?;
        let messages: Vec<Value> = prompt
            .conversation()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": prompt.options.max_output_tokens,
            "temperature": prompt.options.temperature,
            "messages": messages,
            "stream": stream,
        });
        if let Some(system) = prompt.system() {
            body["system"] = Value::String(system.to_string());
        }

        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        super::send(NAME, request).await
    }
}

fn stream_step(data: &str) -> SseStep {
    let Some(event) = sse::parse_event(data) else {
        return SseStep::Skip;
    };
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => match event.pointer("/delta/text").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => SseStep::Fragment(text.to_string()),
            _ => SseStep::Skip,
        },
        Some("message_stop") => SseStep::Done,
        Some("error") => SseStep::Fail(GenerationError::Upstream {
            provider: NAME.to_string(),
            status: 200,
            body: event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream failed")
                .to_string(),
        }),
        _ => SseStep::Skip,
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let resp = self.post(prompt, false).await?;
        let value = super::read_json(NAME, resp).await?;
        let text: String = value
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse {
                provider: NAME.to_string(),
            });
        }
        Ok(text)
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, GenerationError> {
        let resp = self.post(prompt, true).await?;
        Ok(sse::fragments(NAME, resp, stream_step))
    }
}
