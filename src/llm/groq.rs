//! Groq provider (OpenAI-compatible chat completions).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::sse::{self, SseStep};
use super::{FragmentStream, LanguageModel, Prompt};
use crate::config::ProviderConfig;
use crate::error::GenerationError;

const NAME: &str = "groq";
const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct GroqModel {
    api_key: Option<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GroqModel {
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
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": prompt.options.temperature,
            "max_tokens": prompt.options.max_output_tokens,
            "stream": stream,
        });

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&body);
        super::send(NAME, request).await
    }
}

fn stream_step(data: &str) -> SseStep {
    let Some(chunk) = sse::parse_event(data) else {
        return SseStep::Skip;
    };
    if let Some(message) = chunk.pointer("/error/message").and_then(Value::as_str) {
        return SseStep::Fail(GenerationError::Upstream {
            provider: NAME.to_string(),
            status: 200,
            body: message.to_string(),
        });
    }
    match chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(content) if !content.is_empty() => SseStep::Fragment(content.to_string()),
        _ => SseStep::Skip,
    }
}

#[async_trait]
impl LanguageModel for GroqModel {
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
        let text = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse {
                provider: NAME.to_string(),
            });
        }
        Ok(text.to_string())
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, GenerationError> {
        let resp = self.post(prompt, true).await?;
        Ok(sse::fragments(NAME, resp, stream_step))
    }
}
