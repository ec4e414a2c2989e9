//! TOML configuration parsing.
//!
//! Every section has built-in defaults, so an empty file (or no file at all)
//! yields a runnable configuration. Credentials are usually supplied through
//! the environment; [`Config::apply_env`] fills any that the file leaves unset.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_context_docs")]
    pub max_context_docs: usize,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_max_sources_display")]
    pub max_sources_display: usize,
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,
    #[serde(default = "default_min_context_length")]
    pub min_context_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_context_docs: default_max_context_docs(),
            max_context_length: default_max_context_length(),
            max_sources_display: default_max_sources_display(),
            snippet_length: default_snippet_length(),
            min_context_length: default_min_context_length(),
        }
    }
}

fn default_max_results() -> usize {
    100
}
fn default_max_context_docs() -> usize {
    10
}
fn default_max_context_length() -> usize {
    1500
}
fn default_max_sources_display() -> usize {
    20
}
fn default_snippet_length() -> usize {
    200
}
fn default_min_context_length() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// Ranked provider names; the first one with credentials answers.
    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
    #[serde(default = "ProviderConfig::openai")]
    pub openai: ProviderConfig,
    #[serde(default = "ProviderConfig::groq")]
    pub groq: ProviderConfig,
    #[serde(default = "ProviderConfig::anthropic")]
    pub anthropic: ProviderConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider_order: default_provider_order(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            reasoning_effort: default_reasoning_effort(),
            verbosity: default_verbosity(),
            openai: ProviderConfig::openai(),
            groq: ProviderConfig::groq(),
            anthropic: ProviderConfig::anthropic(),
        }
    }
}

fn default_provider_order() -> Vec<String> {
    vec![
        "openai".to_string(),
        "groq".to_string(),
        "anthropic".to_string(),
    ]
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_temperature() -> f32 {
    0.2
}
fn default_reasoning_effort() -> String {
    "medium".to_string()
}
fn default_verbosity() -> String {
    "medium".to_string()
}

/// Credentials and endpoint for one language-model provider.
///
/// Partial tables in the config file are completed from the provider's
/// defaults by [`Config::apply_env`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    fn openai() -> Self {
        Self {
            api_key: None,
            model: Some("gpt-5-mini".to_string()),
            base_url: Some("https://api.openai.com/v1".to_string()),
        }
    }

    fn groq() -> Self {
        Self {
            api_key: None,
            model: Some("meta-llama/llama-4-scout-17b-16e-instruct".to_string()),
            base_url: Some("https://api.groq.com/openai/v1".to_string()),
        }
    }

    fn anthropic() -> Self {
        Self {
            api_key: None,
            model: Some("claude-3-5-sonnet-20241022".to_string()),
            base_url: Some("https://api.anthropic.com/v1".to_string()),
        }
    }

    fn fill_from(&mut self, defaults: ProviderConfig, key_var: &str) {
        if self.api_key.is_none() {
            self.api_key = env_nonempty(key_var);
        }
        if self.model.is_none() {
            self.model = defaults.model;
        }
        if self.base_url.is_none() {
            self.base_url = defaults.base_url;
        }
    }

    /// A provider is usable once it has a non-blank key.
    pub fn has_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"upstash"` or `"local"`.
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// JSON file backing the local index. Without it the local index lives
    /// in memory only.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            url: None,
            token: None,
            index_name: default_index_name(),
            local_path: None,
        }
    }
}

fn default_index_provider() -> String {
    "upstash".to_string()
}
fn default_index_name() -> String {
    "lejechat".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"auto"`, `"redis"`, `"file"`, or `"memory"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_token: Option<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            redis_url: None,
            redis_token: None,
            file_path: None,
        }
    }
}

fn default_storage_backend() -> String {
    "auto".to_string()
}

impl StorageConfig {
    pub fn has_redis(&self) -> bool {
        self.redis_url.is_some() && self.redis_token.is_some()
    }

    pub fn resolved_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".lejechat-indexes.json"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Fill unset credentials and endpoints from the process environment.
    pub fn apply_env(&mut self) {
        self.ai
            .openai
            .fill_from(ProviderConfig::openai(), "OPENAI_API_KEY");
        self.ai.groq.fill_from(ProviderConfig::groq(), "GROQ_API_KEY");
        self.ai
            .anthropic
            .fill_from(ProviderConfig::anthropic(), "ANTHROPIC_API_KEY");

        if self.index.url.is_none() {
            self.index.url = env_nonempty("UPSTASH_SEARCH_REST_URL");
        }
        if self.index.token.is_none() {
            self.index.token = env_nonempty("UPSTASH_SEARCH_REST_TOKEN");
        }

        if self.storage.redis_url.is_none() {
            self.storage.redis_url = env_nonempty("UPSTASH_REDIS_REST_URL");
        }
        if self.storage.redis_token.is_none() {
            self.storage.redis_token = env_nonempty("UPSTASH_REDIS_REST_TOKEN");
        }
        if self.storage.file_path.is_none() {
            self.storage.file_path = env_nonempty("LEJECHAT_STORAGE_PATH").map(PathBuf::from);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.search.max_results == 0 {
            anyhow::bail!("search.max_results must be >= 1");
        }
        if self.search.max_context_docs > self.search.max_sources_display {
            anyhow::bail!("search.max_context_docs must not exceed search.max_sources_display");
        }
        if self.search.max_context_length == 0 {
            anyhow::bail!("search.max_context_length must be > 0");
        }
        if self.ai.timeout_secs == 0 {
            anyhow::bail!("ai.timeout_secs must be > 0");
        }

        for name in &self.ai.provider_order {
            match name.as_str() {
                "openai" | "groq" | "anthropic" => {}
                other => anyhow::bail!(
                    "Unknown AI provider: '{}'. Must be openai, groq, or anthropic.",
                    other
                ),
            }
        }

        match self.index.provider.as_str() {
            "upstash" | "local" => {}
            other => anyhow::bail!(
                "Unknown index provider: '{}'. Must be upstash or local.",
                other
            ),
        }

        match self.storage.backend.as_str() {
            "auto" | "redis" | "file" | "memory" => {}
            other => anyhow::bail!(
                "Unknown storage backend: '{}'. Must be auto, redis, file, or memory.",
                other
            ),
        }

        Ok(())
    }
}

/// Parse a config from TOML text, then apply environment fallbacks and validate.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path`.
///
/// When `required` is false and the file does not exist, built-in defaults
/// are used instead.
pub fn load_config(path: &Path, required: bool) -> Result<Config> {
    if !required && !path.exists() {
        return parse_config("");
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.search.max_results, 100);
        assert_eq!(config.search.max_context_docs, 10);
        assert_eq!(config.search.max_sources_display, 20);
        assert_eq!(config.search.max_context_length, 1500);
        assert_eq!(config.ai.provider_order, vec!["openai", "groq", "anthropic"]);
        assert_eq!(config.storage.backend, "auto");
        assert_eq!(config.ai.openai.model.as_deref(), Some("gpt-5-mini"));
    }

    #[test]
    fn test_partial_provider_table_keeps_defaults() {
        let config = parse_config(
            r#"
[ai.groq]
api_key = "gsk-test"
"#,
        )
        .unwrap();
        assert!(config.ai.groq.has_key());
        assert_eq!(
            config.ai.groq.base_url.as_deref(),
            Some("https://api.groq.com/openai/v1")
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config(
            r#"
[ai]
provider_order = ["openai", "mistral"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mistral"));
    }

    #[test]
    fn test_context_docs_bounded_by_sources() {
        let err = parse_config(
            r#"
[search]
max_context_docs = 30
max_sources_display = 20
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_context_docs"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/lejechat.example.toml")).unwrap();
        assert_eq!(config.index.provider, "upstash");
        assert_eq!(config.ai.timeout_secs, 60);
    }

    #[test]
    fn test_missing_optional_file_falls_back() {
        let config = load_config(Path::new("/nonexistent/lejechat.toml"), false).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn test_missing_required_file_fails() {
        assert!(load_config(Path::new("/nonexistent/lejechat.toml"), true).is_err());
    }

    #[test]
    fn test_blank_key_is_not_configured() {
        let provider = ProviderConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!provider.has_key());
    }
}
