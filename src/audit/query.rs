use serde::{Deserialize, Serialize};

use super::reader::AuditReader;
use super::{AuditError, AuditRecord};

/// Filters for reading the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Keep records whose action starts with this (e.g. `block`, `policy_`)
    #[serde(default)]
    pub action_prefix: Option<String>,
    /// Keep records whose timestamp starts with this (e.g. `2026-10-19`)
    #[serde(default)]
    pub date_prefix: Option<String>,
    /// Stop after this many matching records
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn all() -> Self {
        AuditFilter::default()
    }

    pub fn with_action(mut self, prefix: impl Into<String>) -> Self {
        self.action_prefix = Some(prefix.into());
        self
    }

    pub fn with_date(mut self, prefix: impl Into<String>) -> Self {
        self.date_prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        let action_ok = self
            .action_prefix
            .as_deref()
            .map_or(true, |p| record.action.starts_with(p));
        let date_ok = self
            .date_prefix
            .as_deref()
            .map_or(true, |p| record.timestamp.starts_with(p));

        action_ok && date_ok
    }
}

/// Streaming, filtered view over the audit file, oldest first.
pub struct AuditQuery {
    reader: AuditReader,
    filter: AuditFilter,
    yielded: usize,
}

impl AuditQuery {
    pub(crate) fn new(reader: AuditReader, filter: AuditFilter) -> Self {
        AuditQuery {
            reader,
            filter,
            yielded: 0,
        }
    }
}

impl Iterator for AuditQuery {
    type Item = Result<AuditRecord, AuditError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.filter.limit.is_some_and(|limit| self.yielded >= limit) {
            return None;
        }

        loop {
            match self.reader.next_record() {
                Ok(Some(record)) => {
                    if self.filter.matches(&record) {
                        self.yielded += 1;
                        return Some(Ok(record));
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
