//! OpenAI provider using the Responses API.
//!
//! Sends `POST {base_url}/responses`. Blocking calls read the aggregated
//! `output_text` (or the `output[].content[]` parts when that field is
//! absent); streaming calls consume `response.output_text.delta` events.
//! Reasoning models ignore `temperature`, so it is not sent.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::sse::{self, SseStep};
use super::{FragmentStream, LanguageModel, Prompt};
use crate::config::ProviderConfig;
use crate::error::GenerationError;

const NAME: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-5-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiModel {
    api_key: Option<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiModel {
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

    fn body(&self, prompt: &Prompt, stream: bool) -> Value {
        let input: Vec<Value> = prompt
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        json!({
            "model": self.model,
            "input": input,
            "max_output_tokens": prompt.options.max_output_tokens,
            "reasoning": { "effort": prompt.options.reasoning_effort },
            "text": { "verbosity": prompt.options.verbosity },
            "stream": stream,
        })
    }

    async fn post(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::Response, GenerationError> {
        let key = self.api_key.as_deref().ok_or(GenerationError::NoProvider)?;
        let request = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(key)
            .json(&self.body(prompt, stream));
        super::send(NAME, request).await
    }
}

/// Concatenate the assistant text of a non-streamed response.
fn output_text(value: &Value) -> String {
    if let Some(text) = value.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }

    let mut out = String::new();
    for item in value
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        for part in item
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
        }
    }
    out
}

fn stream_step(data: &str) -> SseStep {
    let Some(event) = sse::parse_event(data) else {
        return SseStep::Skip;
    };
    match event.get("type").and_then(Value::as_str) {
        Some("response.output_text.delta") => match event.get("delta").and_then(Value::as_str) {
            Some(delta) if !delta.is_empty() => SseStep::Fragment(delta.to_string()),
            _ => SseStep::Skip,
        },
        Some("response.completed") => SseStep::Done,
        Some("response.failed") | Some("error") => {
            let message = event
                .pointer("/response/error/message")
                .or_else(|| event.pointer("/error/message"))
                .or_else(|| event.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("stream failed")
                .to_string();
            SseStep::Fail(GenerationError::Upstream {
                provider: NAME.to_string(),
                status: 200,
                body: message,
            })
        }
        _ => SseStep::Skip,
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
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
        let text = output_text(&value);
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
