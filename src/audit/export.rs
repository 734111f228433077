use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::chain::VerifyReport;
use super::{AuditError, AuditFilter, AuditRecord};

/// Export target format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Single JSON document with records and verification
    Json,
    /// Tabular form, one row per record
    Csv,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Exported records, always paired with a fresh chain verification.
#[derive(Debug, Clone)]
pub struct AuditExport {
    pub format: ExportFormat,
    pub content: Vec<u8>,
    pub record_count: usize,
    pub verification: VerifyReport,
}

const CSV_HEADER: [&str; 10] = [
    "timestamp",
    "request_id",
    "action",
    "direction",
    "endpoint",
    "rule_ids",
    "text_excerpt",
    "content_hash",
    "previous_hash",
    "metadata",
];

pub(crate) fn render(
    format: ExportFormat,
    records: &[AuditRecord],
    filter: &AuditFilter,
    verification: &VerifyReport,
) -> Result<Vec<u8>, AuditError> {
    match format {
        ExportFormat::Json => render_json(records, filter, verification),
        ExportFormat::Csv => render_csv(records),
    }
}

fn render_json(
    records: &[AuditRecord],
    filter: &AuditFilter,
    verification: &VerifyReport,
) -> Result<Vec<u8>, AuditError> {
    let document = json!({
        "exported_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "filter": filter,
        "verification": verification,
        "record_count": records.len(),
        "records": records,
    });

    serde_json::to_vec_pretty(&document).map_err(AuditError::Serialization)
}

fn render_csv(records: &[AuditRecord]) -> Result<Vec<u8>, AuditError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for record in records {
        let metadata = serde_json::to_string(&record.metadata).map_err(AuditError::Serialization)?;
        let rule_ids = record.rule_ids.join(";");
        writer.write_record([
            record.timestamp.as_str(),
            record.request_id.as_str(),
            record.action.as_str(),
            record.direction.as_str(),
            record.endpoint.as_str(),
            rule_ids.as_str(),
            record.text_excerpt.as_str(),
            record.content_hash.as_str(),
            record.previous_hash.as_str(),
            metadata.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| AuditError::Export(e.to_string()))
}
