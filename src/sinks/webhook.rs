use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{check_status, http_client, EventSink, SinkError};

/// Posts the batch as one JSON array.
#[derive(Debug)]
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        Ok(WebhookSink {
            name: name.into(),
            url: url.into(),
            client: http_client(true, timeout)?,
        })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, batch: &[Value]) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(batch).send().await?;
        check_status(response).await?;
        Ok(())
    }
}
