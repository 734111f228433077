use serde::{Deserialize, Serialize};

use crate::audit::{AuditFilter, ExportFormat};
use crate::domain::Direction;
use crate::gateway::DecisionRequest;

/// Body of `POST /v1/decision`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionBody {
    pub text: String,
    pub direction: Direction,
    pub endpoint: String,

    #[serde(default)]
    pub agent_id: String,

    /// Falls back to the `x-api-key` header when absent
    #[serde(default)]
    pub credential: Option<String>,
}

impl DecisionBody {
    pub fn into_request(self, header_credential: Option<&str>) -> DecisionRequest {
        let credential = self
            .credential
            .or_else(|| header_credential.map(str::to_string))
            .unwrap_or_default();

        DecisionRequest {
            text: self.text,
            direction: self.direction,
            endpoint: self.endpoint,
            agent_id: self.agent_id,
            credential,
        }
    }
}

/// Query string of `GET /v1/audit/export`.
#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ExportParams {
    /// Defaults to JSON; `None` for an unknown format.
    pub fn format(&self) -> Option<ExportFormat> {
        match &self.format {
            Some(format) => ExportFormat::parse(format),
            None => Some(ExportFormat::Json),
        }
    }

    pub fn to_filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::all();
        if let Some(action) = &self.action {
            filter = filter.with_action(action.clone());
        }
        if let Some(date) = &self.date {
            filter = filter.with_date(date.clone());
        }
        if let Some(limit) = self.limit {
            filter = filter.with_limit(limit);
        }
        filter
    }
}

/// Query string of `POST /v1/dead-letter/{target}/replay`.
#[derive(Debug, Deserialize)]
pub struct ReplayParams {
    #[serde(default = "default_replay_max")]
    pub max: usize,
}

fn default_replay_max() -> usize {
    100
}
