use async_trait::async_trait;
use chrono::Utc;
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

fn default_source() -> String {
    "policygate".to_string()
}

/// HTTP bulk collector settings (HEC-style endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Full URL of the collector endpoint
    #[serde(default)]
    pub endpoint: String,
    /// Bearer token, preferred over basic credentials when both are set
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `source` field of every envelope
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            enabled: false,
            endpoint: String::new(),
            token: None,
            username: None,
            password: None,
            verify_tls: true,
            timeout_ms: default_timeout_ms(),
            source: default_source(),
        }
    }
}

impl CollectorSettings {
    pub fn has_credentials(&self) -> bool {
        let token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        let basic = self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty());
        token || basic
    }
}

#[derive(Debug, Clone)]
enum CollectorAuth {
    Bearer(String),
    Basic { username: String, password: String },
    None,
}

/// Posts batches as newline-separated `{"time","source","event"}` envelopes.
#[derive(Debug)]
pub struct HttpCollectorSink {
    name: String,
    endpoint: String,
    source: String,
    auth: CollectorAuth,
    client: reqwest::Client,
}

impl HttpCollectorSink {
    pub fn new(name: impl Into<String>, settings: &CollectorSettings) -> Result<Self, SinkError> {
        let auth = match (&settings.token, &settings.username, &settings.password) {
            (Some(token), _, _) if !token.is_empty() => CollectorAuth::Bearer(token.clone()),
            (_, Some(username), Some(password)) => CollectorAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => CollectorAuth::None,
        };

        Ok(HttpCollectorSink {
            name: name.into(),
            endpoint: settings.endpoint.clone(),
            source: settings.source.clone(),
            auth,
            client: http_client(settings.verify_tls, Duration::from_millis(settings.timeout_ms))?,
        })
    }

    fn envelope_body(&self, batch: &[Value]) -> Result<String, SinkError> {
        let time = Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut body = String::new();

        for event in batch {
            let envelope = json!({
                "time": time,
                "source": self.source,
                "event": event,
            });
            body.push_str(&serde_json::to_string(&envelope)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl EventSink for HttpCollectorSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, batch: &[Value]) -> Result<(), SinkError> {
        let body = self.envelope_body(batch)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        request = match &self.auth {
            CollectorAuth::Bearer(token) => request.bearer_auth(token),
            CollectorAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            CollectorAuth::None => request,
        };

        check_status(request.send().await?).await?;
        Ok(())
    }
}
