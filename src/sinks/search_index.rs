use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::{check_status, http_client, EventSink, SinkError};

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_index() -> String {
    "policygate-events".to_string()
}

/// Search-index (`_bulk` API) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the cluster
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SearchIndexSettings {
    fn default() -> Self {
        SearchIndexSettings {
            enabled: false,
            endpoint: String::new(),
            index: default_index(),
            username: None,
            password: None,
            verify_tls: true,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SearchIndexSettings {
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Indexes batches through the `_bulk` endpoint.
#[derive(Debug)]
pub struct SearchIndexSink {
    name: String,
    bulk_url: String,
    index: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl SearchIndexSink {
    pub fn new(name: impl Into<String>, settings: &SearchIndexSettings) -> Result<Self, SinkError> {
        Ok(SearchIndexSink {
            name: name.into(),
            bulk_url: format!("{}/_bulk", settings.endpoint.trim_end_matches('/')),
            index: settings.index.clone(),
            username: settings.username.clone().unwrap_or_default(),
            password: settings.password.clone().unwrap_or_default(),
            client: http_client(settings.verify_tls, Duration::from_millis(settings.timeout_ms))?,
        })
    }

    fn bulk_body(&self, batch: &[Value]) -> Result<String, SinkError> {
        let action = serde_json::to_string(&json!({"index": {"_index": self.index}}))?;
        let mut body = String::new();

        for event in batch {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&serde_json::to_string(event)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl EventSink for SearchIndexSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, batch: &[Value]) -> Result<(), SinkError> {
        let body = self.bulk_body(batch)?;

        let response = self
            .client
            .post(&self.bulk_url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let result: Value = response.json().await?;

        if result.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let failed = result
                .get("items")
                .and_then(Value::as_array)
                .map_or(0, |items| {
                    items
                        .iter()
                        .filter(|item| item.pointer("/index/error").is_some())
                        .count()
                });
            return Err(SinkError::Rejected(format!(
                "bulk response reported {failed} failed items"
            )));
        }

        Ok(())
    }
}
