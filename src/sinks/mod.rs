//! Delivery targets for telemetry batches and alerts.
//!
//! Every sink returns `Err` on any failure so the resilience wrapper can
//! retry and dead-letter.

pub mod file;
pub mod http_collector;
pub mod search_index;
pub mod webhook;

pub use file::FileSink;
pub use http_collector::{CollectorSettings, HttpCollectorSink};
pub use search_index::{SearchIndexSettings, SearchIndexSink};
pub use webhook::WebhookSink;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("batch rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<SinkError>,
    },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Target name, also the dead-letter key.
    fn name(&self) -> &str;

    async fn send_batch(&self, batch: &[Value]) -> Result<(), SinkError>;
}

/// Build a client honoring the TLS-verify toggle and request timeout.
pub(crate) fn http_client(verify_tls: bool, timeout: Duration) -> Result<reqwest::Client, SinkError> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_tls)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Map a non-success response to `SinkError::Status`, keeping a short body.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 256 {
        let mut cut = 256;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(SinkError::Status {
        status: status.as_u16(),
        body,
    })
}
