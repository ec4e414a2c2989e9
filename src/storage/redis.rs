//! Upstash Redis [`StorageAdapter`] over the REST API.
//!
//! Commands are sent as JSON arrays (`["SET", key, value]`) to the database
//! URL with a bearer token. Responses have the shape `{"result": ...}` or
//! `{"error": "..."}`. Values are stored as JSON-encoded strings.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{upsert_capped, StorageAdapter};
use crate::error::StorageError;
use crate::models::SiteIndexMetadata;

/// Key holding the capped, most-recent-first list.
pub const INDEXES_KEY: &str = "lejechat:indexes";
/// Prefix for per-namespace point records.
pub const INDEX_KEY_PREFIX: &str = "lejechat:index:";

pub struct RedisStorage {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl RedisStorage {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    async fn command(&self, args: Value) -> Result<Value, StorageError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        let remote_error = body
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(|e| e.as_str());
        if let Some(err) = remote_error {
            return Err(StorageError::Remote(format!("{} ({})", err, status)));
        }
        if !status.is_success() {
            return Err(StorageError::Remote(format!("HTTP {}", status)));
        }

        match body.and_then(|mut b| b.get_mut("result").map(Value::take)) {
            Some(result) => Ok(result),
            None => Err(StorageError::Remote(format!(
                "unexpected response ({}): {}",
                status,
                crate::models::truncate_chars(&text, 200)
            ))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.command(json!(["GET", key])).await? {
            Value::Null => Ok(None),
            Value::String(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            other => Ok(Some(serde_json::from_value(other)?)),
        }
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(value)?;
        self.command(json!(["SET", key, encoded])).await?;
        Ok(())
    }

    fn index_key(namespace: &str) -> String {
        format!("{}{}", INDEX_KEY_PREFIX, namespace)
    }
}

#[async_trait]
impl StorageAdapter for RedisStorage {
    async fn get_indexes(&self) -> Result<Vec<SiteIndexMetadata>, StorageError> {
        let list: Option<Vec<SiteIndexMetadata>> = self.get_json(INDEXES_KEY).await?;
        Ok(list
            .unwrap_or_default()
            .into_iter()
            .map(SiteIndexMetadata::normalized)
            .collect())
    }

    async fn get_index(&self, namespace: &str) -> Result<Option<SiteIndexMetadata>, StorageError> {
        let found: Option<SiteIndexMetadata> = self.get_json(&Self::index_key(namespace)).await?;
        Ok(found.map(SiteIndexMetadata::normalized))
    }

    async fn save_index(&self, index: &SiteIndexMetadata) -> Result<(), StorageError> {
        let normalized = index.clone().normalized();
        self.set_json(&Self::index_key(&normalized.namespace), &normalized)
            .await?;

        let current = self.get_indexes().await?;
        let updated = upsert_capped(current, normalized);
        self.set_json(INDEXES_KEY, &updated).await
    }

    async fn delete_index(&self, namespace: &str) -> Result<(), StorageError> {
        self.command(json!(["DEL", Self::index_key(namespace)]))
            .await?;

        let mut current = self.get_indexes().await?;
        current.retain(|i| i.namespace != namespace);
        self.set_json(INDEXES_KEY, &current).await
    }
}
