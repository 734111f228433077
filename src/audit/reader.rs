use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

use super::{AuditError, AuditRecord};

/// Raw line from the audit file, parsed when possible.
#[derive(Debug)]
pub enum AuditLine {
    Record(AuditRecord),
    Malformed { line_no: u64, error: String },
}

/// Sequential reader over the audit file, oldest first.
pub struct AuditReader {
    reader: BufReader<File>,
    line_buffer: Vec<u8>,
    line_no: u64,
    records_read: u64,
    errors: u64,
}

impl AuditReader {
    /// Open an audit file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = File::open(path).map_err(AuditError::Storage)?;

        Ok(AuditReader {
            reader: BufReader::new(file),
            line_buffer: Vec::with_capacity(1024),
            line_no: 0,
            records_read: 0,
            errors: 0,
        })
    }

    /// Read the next non-empty line, reporting malformed lines instead of
    /// skipping them. Returns None at end of file.
    pub fn next_line(&mut self) -> Result<Option<AuditLine>, AuditError> {
        loop {
            self.line_buffer.clear();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut self.line_buffer)
                .map_err(AuditError::Storage)?;

            if bytes_read == 0 {
                return Ok(None);
            }

            let line = self.line_buffer.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let line_no = self.line_no;
            self.line_no += 1;

            // Invalid UTF-8 is a damaged line, not a storage failure
            let parsed = std::str::from_utf8(line)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<AuditRecord>(text).map_err(|e| e.to_string())
                });

            return Ok(Some(match parsed {
                Ok(record) => {
                    self.records_read += 1;
                    AuditLine::Record(record)
                }
                Err(error) => {
                    self.errors += 1;
                    AuditLine::Malformed { line_no, error }
                }
            }));
        }
    }

    /// Read the next record, skipping malformed lines with a warning.
    pub fn next_record(&mut self) -> Result<Option<AuditRecord>, AuditError> {
        loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(AuditLine::Record(record)) => return Ok(Some(record)),
                Some(AuditLine::Malformed { line_no, error }) => {
                    warn!(line = line_no, error = %error, "Skipping malformed audit line");
                }
            }
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Number of malformed lines seen so far.
    pub fn errors(&self) -> u64 {
        self.errors
    }
}

impl Iterator for AuditReader {
    type Item = Result<AuditRecord, AuditError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
