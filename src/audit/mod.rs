//! Tamper-evident audit trail.
//!
//! Records are appended as JSON lines. Each record carries the SHA3-256
//! hash of its own canonical form chained to the previous record's hash,
//! so any edit, deletion or reordering shows up as a break on `verify`.

pub mod chain;
pub mod export;
pub mod query;
pub mod reader;
pub mod record;

pub use chain::{AuditChain, RedactionOutcome, VerifyReport};
pub use export::{AuditExport, ExportFormat};
pub use query::{AuditFilter, AuditQuery};
pub use reader::{AuditLine, AuditReader};
pub use record::{AuditFields, AuditRecord, GENESIS_HASH};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit storage error: {0}")]
    Storage(#[source] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("canonicalization failed: {0}")]
    Canonicalization(#[source] serde_json::Error),

    #[error("audit chain broken at record {index}: {reason}")]
    ChainIntegrity { index: u64, reason: String },

    #[error("no audit records for request {0}")]
    NotFound(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
