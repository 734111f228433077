use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::export::{self, AuditExport, ExportFormat};
use super::query::{AuditFilter, AuditQuery};
use super::reader::{AuditLine, AuditReader};
use super::{AuditError, AuditFields, AuditRecord, GENESIS_HASH};
use crate::rules::Redactor;

/// Result of walking the chain from genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub valid: bool,
    /// Records in the chain
    pub total: u64,
    /// Records verified before the first break
    pub verified_records: u64,
    /// Index of the first record that failed verification
    pub break_point: Option<u64>,
    pub error: Option<String>,
}

impl VerifyReport {
    pub fn intact(total: u64) -> Self {
        VerifyReport {
            valid: true,
            total,
            verified_records: total,
            break_point: None,
            error: None,
        }
    }

    fn broken(total: u64, index: u64, error: impl Into<String>) -> Self {
        VerifyReport {
            valid: false,
            total,
            verified_records: index,
            break_point: Some(index),
            error: Some(error.into()),
        }
    }
}

/// Outcome of an audited redaction.
#[derive(Debug, Clone)]
pub struct RedactionOutcome {
    pub records_rewritten: usize,
    /// The `redaction` record appended after the rewrite
    pub record: AuditRecord,
}

/// Durable sink for appended lines.
trait AuditWriter: Write + Send {
    fn sync(&mut self) -> io::Result<()>;

    /// Cut the file back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl AuditWriter for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_data()
    }
}

struct ChainState {
    writer: Box<dyn AuditWriter>,
    head_hash: String,
    /// Non-empty lines in the file, parseable or not
    lines: u64,
    /// File length after the last durable append
    bytes: u64,
    /// Set when a failed append could not be rolled back. The file may end
    /// in a record the head hash does not know about.
    poisoned: bool,
}

/// Hash-linked, append-only audit trail stored as JSON lines.
///
/// Reading the head hash, sealing the new record and writing it happen
/// under one lock, so no two records can share a `previous_hash`.
pub struct AuditChain {
    path: PathBuf,
    sync_on_append: bool,
    state: Mutex<ChainState>,
}

impl AuditChain {
    /// Open or create an audit file, recovering the head hash from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(AuditError::Storage)?;
            }
        }

        let file = open_append(&path)?;
        let bytes = file.metadata().map_err(AuditError::Storage)?.len();
        let (head_hash, lines) = scan_head(&path)?;

        info!(
            path = %path.display(),
            records = lines,
            "Opened audit chain"
        );

        Ok(AuditChain {
            path,
            sync_on_append: true,
            state: Mutex::new(ChainState {
                writer: Box::new(file),
                head_hash,
                lines,
                bytes,
                poisoned: false,
            }),
        })
    }

    /// Skip fsync after each append (tests and benchmarks).
    pub fn without_sync(mut self) -> Self {
        self.sync_on_append = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash the next record will link to.
    pub fn head_hash(&self) -> String {
        self.state.lock().head_hash.clone()
    }

    pub fn len(&self) -> u64 {
        self.state.lock().lines
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record. Fails with `AuditError::Storage` when the line
    /// cannot be durably written; the caller must not report a decision
    /// in that case.
    pub fn append(&self, fields: AuditFields) -> Result<AuditRecord, AuditError> {
        let mut state = self.state.lock();
        append_locked(&mut state, fields, self.sync_on_append)
    }

    /// Walk the whole file from genesis, recomputing every hash and link.
    ///
    /// Appends wait while the walk runs so the last line is never read
    /// half written.
    pub fn verify(&self) -> Result<VerifyReport, AuditError> {
        let _state = self.state.lock();
        let mut reader = AuditReader::open(&self.path)?;
        let mut expected_previous = GENESIS_HASH.to_string();
        let mut first_break: Option<(u64, String)> = None;
        let mut total = 0u64;

        while let Some(line) = reader.next_line()? {
            let index = total;
            total += 1;
            if first_break.is_some() {
                continue;
            }

            let record = match line {
                AuditLine::Record(record) => record,
                AuditLine::Malformed { error, .. } => {
                    first_break = Some((index, format!("unparseable record: {error}")));
                    continue;
                }
            };

            if record.previous_hash != expected_previous {
                first_break = Some((
                    index,
                    "previous_hash does not match the prior record".to_string(),
                ));
            } else if record.compute_hash()? != record.content_hash {
                first_break = Some((index, "content_hash mismatch".to_string()));
            } else {
                expected_previous = record.content_hash;
            }
        }

        Ok(match first_break {
            Some((index, error)) => VerifyReport::broken(total, index, error),
            None => VerifyReport::intact(total),
        })
    }

    /// Verify and turn a broken chain into `AuditError::ChainIntegrity`.
    pub fn ensure_intact(&self) -> Result<VerifyReport, AuditError> {
        let report = self.verify()?;
        match report.break_point {
            Some(index) if !report.valid => Err(AuditError::ChainIntegrity {
                index,
                reason: report.error.unwrap_or_default(),
            }),
            _ => Ok(report),
        }
    }

    /// Stream records matching the filter, oldest first.
    pub fn get(&self, filter: &AuditFilter) -> Result<AuditQuery, AuditError> {
        let reader = AuditReader::open(&self.path)?;
        Ok(AuditQuery::new(reader, filter.clone()))
    }

    /// Re-serialize matching records alongside a fresh verification.
    pub fn export(
        &self,
        filter: &AuditFilter,
        format: ExportFormat,
    ) -> Result<AuditExport, AuditError> {
        let verification = self.verify()?;
        let records = self.get(filter)?.collect::<Result<Vec<_>, _>>()?;
        let content = export::render(format, &records, filter, &verification)?;

        Ok(AuditExport {
            format,
            content,
            record_count: records.len(),
            verification,
        })
    }

    /// Mask the excerpts of every record for `request_id`, re-link the
    /// chain from the first rewritten record and append a `redaction`
    /// record describing the rewrite.
    ///
    /// Refuses to touch a chain that does not verify.
    pub fn redact(
        &self,
        request_id: &str,
        redactor: &Redactor,
        operator: &str,
    ) -> Result<RedactionOutcome, AuditError> {
        let mut state = self.state.lock();

        let mut records = read_all_strict(&self.path)?;
        let first = records
            .iter()
            .position(|r| r.request_id == request_id)
            .ok_or_else(|| AuditError::NotFound(request_id.to_string()))?;

        let prior_head = state.head_hash.clone();
        // Links as stored on disk, checked before anything is rewritten
        let mut original_previous = GENESIS_HASH.to_string();
        // Links after re-sealing
        let mut relinked_previous = GENESIS_HASH.to_string();
        let mut rewritten = 0usize;

        for (index, record) in records.iter_mut().enumerate() {
            if record.previous_hash != original_previous
                || record.compute_hash()? != record.content_hash
            {
                return Err(AuditError::ChainIntegrity {
                    index: index as u64,
                    reason: "chain must verify before redaction".to_string(),
                });
            }
            original_previous = record.content_hash.clone();

            if index >= first {
                if record.request_id == request_id {
                    record.text_excerpt = redactor.redact(&record.text_excerpt);
                    rewritten += 1;
                }
                record.previous_hash = relinked_previous.clone();
                record.seal()?;
            }

            relinked_previous = record.content_hash.clone();
        }

        let tmp_path = self.path.with_extension("redact.tmp");
        write_all_records(&tmp_path, &records)?;
        fs::rename(&tmp_path, &self.path).map_err(AuditError::Storage)?;

        let file = open_append(&self.path)?;
        state.bytes = file.metadata().map_err(AuditError::Storage)?.len();
        state.lines = records.len() as u64;
        state.writer = Box::new(file);
        state.head_hash = relinked_previous;
        state.poisoned = false;

        warn!(
            request_id = request_id,
            operator = operator,
            records = rewritten,
            "Audit records redacted"
        );

        let record = append_locked(
            &mut state,
            AuditFields::event(
                "redaction",
                uuid::Uuid::new_v4().to_string(),
                json!({
                    "target_request_id": request_id,
                    "records_rewritten": rewritten,
                    "prior_head_hash": prior_head,
                    "operator": operator,
                }),
            ),
            self.sync_on_append,
        )?;

        Ok(RedactionOutcome {
            records_rewritten: rewritten,
            record,
        })
    }

    #[cfg(test)]
    pub(crate) fn break_storage(&self) {
        self.state.lock().writer = Box::new(BrokenWriter);
    }

    /// Lines reach the file but fsync fails. `can_truncate` controls
    /// whether the rollback succeeds.
    #[cfg(test)]
    fn fail_sync(&self, can_truncate: bool) {
        let file = open_append(&self.path).unwrap();
        self.state.lock().writer = Box::new(SyncFailsWriter { file, can_truncate });
    }

    /// Put a working writer back without clearing a poisoned chain.
    #[cfg(test)]
    fn restore_storage(&self) {
        self.state.lock().writer = Box::new(open_append(&self.path).unwrap());
    }
}

fn append_locked(
    state: &mut ChainState,
    fields: AuditFields,
    sync: bool,
) -> Result<AuditRecord, AuditError> {
    let mut record = AuditRecord {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        request_id: fields.request_id,
        action: fields.action,
        direction: fields.direction,
        endpoint: fields.endpoint,
        rule_ids: fields.rule_ids,
        text_excerpt: fields.text_excerpt,
        content_hash: String::new(),
        previous_hash: state.head_hash.clone(),
        metadata: fields.metadata,
    };
    record.seal()?;

    let mut line = serde_json::to_string(&record).map_err(AuditError::Serialization)?;
    line.push('\n');

    if state.poisoned {
        return Err(AuditError::Storage(io::Error::new(
            io::ErrorKind::Other,
            "audit file has an unrecovered partial append, reopen the chain",
        )));
    }

    let written = state
        .writer
        .write_all(line.as_bytes())
        .and_then(|_| state.writer.flush())
        .and_then(|_| if sync { state.writer.sync() } else { Ok(()) });

    if let Err(e) = written {
        // Cut back to the last durable record so the head hash still
        // matches the end of the file
        if let Err(rollback) = state.writer.truncate(state.bytes) {
            error!(
                error = %rollback,
                length = state.bytes,
                "Failed to roll back audit append, refusing further appends"
            );
            state.poisoned = true;
        }
        return Err(AuditError::Storage(e));
    }

    state.head_hash = record.content_hash.clone();
    state.lines += 1;
    state.bytes += line.len() as u64;

    Ok(record)
}

fn open_append(path: &Path) -> Result<File, AuditError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(AuditError::Storage)
}

/// Find the last sealed hash and count lines.
fn scan_head(path: &Path) -> Result<(String, u64), AuditError> {
    let mut reader = AuditReader::open(path)?;
    let mut head = GENESIS_HASH.to_string();
    let mut lines = 0u64;

    while let Some(line) = reader.next_line()? {
        lines += 1;
        match line {
            AuditLine::Record(record) => head = record.content_hash,
            AuditLine::Malformed { line_no, error } => {
                warn!(line = line_no, error = %error, "Malformed audit line while scanning head");
            }
        }
    }

    Ok((head, lines))
}

fn read_all_strict(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let mut reader = AuditReader::open(path)?;
    let mut records = Vec::new();

    while let Some(line) = reader.next_line()? {
        match line {
            AuditLine::Record(record) => records.push(record),
            AuditLine::Malformed { line_no, .. } => {
                return Err(AuditError::ChainIntegrity {
                    index: line_no,
                    reason: "unparseable record".to_string(),
                });
            }
        }
    }

    Ok(records)
}

fn write_all_records(path: &Path, records: &[AuditRecord]) -> Result<(), AuditError> {
    let mut file = File::create(path).map_err(AuditError::Storage)?;
    for record in records {
        let line = serde_json::to_string(record).map_err(AuditError::Serialization)?;
        writeln!(file, "{line}").map_err(AuditError::Storage)?;
    }
    file.sync_all().map_err(AuditError::Storage)
}

#[cfg(test)]
struct BrokenWriter;

#[cfg(test)]
impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "disk unavailable"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk unavailable"))
    }
}

#[cfg(test)]
impl AuditWriter for BrokenWriter {
    fn sync(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk unavailable"))
    }

    fn truncate(&mut self, _len: u64) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk unavailable"))
    }
}

#[cfg(test)]
struct SyncFailsWriter {
    file: File,
    can_truncate: bool,
}

#[cfg(test)]
impl Write for SyncFailsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
impl AuditWriter for SyncFailsWriter {
    fn sync(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "fsync failed"))
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if self.can_truncate {
            self.file.set_len(len)
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "read-only filesystem"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RedactionPattern;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fields(request_id: &str, action: &str, excerpt: &str) -> AuditFields {
        AuditFields {
            request_id: request_id.to_string(),
            action: action.to_string(),
            direction: "outbound".to_string(),
            endpoint: "/lookup".to_string(),
            rule_ids: vec!["SSN-1".to_string()],
            text_excerpt: excerpt.to_string(),
            metadata: json!({"raw_action": action}),
        }
    }

    fn open_chain(dir: &TempDir) -> AuditChain {
        AuditChain::open(dir.path().join("audit.jsonl"))
            .unwrap()
            .without_sync()
    }

    /// Replace one character inside the `field` value of line `index`.
    fn tamper(path: &Path, index: usize, field: &str) {
        let content = fs::read_to_string(path).unwrap();
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let marker = format!("\"{field}\":\"");
        let start = lines[index].find(&marker).unwrap() + marker.len();
        let original = lines[index].as_bytes()[start] as char;
        let replacement = if original == 'a' { 'b' } else { 'a' };
        lines[index].replace_range(start..start + 1, &replacement.to_string());
        fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    #[test]
    fn test_first_record_links_to_genesis() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);

        let first = chain.append(fields("r1", "block", "x")).unwrap();
        let second = chain.append(fields("r2", "allow", "y")).unwrap();

        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.content_hash);
        assert_eq!(chain.head_hash(), second.content_hash);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_n_appends_verify() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);

        for i in 0..25 {
            chain.append(fields(&format!("r{i}"), "allow", "text")).unwrap();
        }

        let report = chain.verify().unwrap();
        assert!(report.valid);
        assert_eq!(report.total, 25);
        assert_eq!(report.verified_records, 25);
        assert_eq!(report.break_point, None);
    }

    #[test]
    fn test_empty_chain_verifies() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);

        assert_eq!(chain.verify().unwrap(), VerifyReport::intact(0));
    }

    #[test]
    fn test_content_hash_mutation_detected_at_index() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        for i in 0..5 {
            chain.append(fields(&format!("r{i}"), "flag", "t")).unwrap();
        }

        tamper(chain.path(), 3, "content_hash");

        let report = chain.verify().unwrap();
        assert!(!report.valid);
        assert_eq!(report.break_point, Some(3));
        assert_eq!(report.verified_records, 3);
        assert!(matches!(
            chain.ensure_intact(),
            Err(AuditError::ChainIntegrity { index: 3, .. })
        ));
    }

    #[test]
    fn test_previous_hash_mutation_detected_at_index() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        for i in 0..4 {
            chain.append(fields(&format!("r{i}"), "flag", "t")).unwrap();
        }

        tamper(chain.path(), 2, "previous_hash");

        let report = chain.verify().unwrap();
        assert!(!report.valid);
        assert_eq!(report.break_point, Some(2));
    }

    #[test]
    fn test_field_edit_detected() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r0", "block", "secret")).unwrap();
        chain.append(fields("r1", "block", "secret")).unwrap();

        let content = fs::read_to_string(chain.path()).unwrap();
        fs::write(chain.path(), content.replacen("\"action\":\"block\"", "\"action\":\"allow\"", 1)).unwrap();

        let report = chain.verify().unwrap();
        assert_eq!(report.break_point, Some(0));
        assert_eq!(report.error.as_deref(), Some("content_hash mismatch"));
    }

    #[test]
    fn test_deleted_record_detected() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        for i in 0..3 {
            chain.append(fields(&format!("r{i}"), "allow", "t")).unwrap();
        }

        let content = fs::read_to_string(chain.path()).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(chain.path(), kept.join("\n") + "\n").unwrap();

        let report = chain.verify().unwrap();
        assert!(!report.valid);
        assert_eq!(report.break_point, Some(1));
    }

    #[test]
    fn test_reopen_continues_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");

        let head = {
            let chain = AuditChain::open(&path).unwrap();
            chain.append(fields("r1", "allow", "a")).unwrap();
            chain.head_hash()
        };

        let chain = AuditChain::open(&path).unwrap();
        assert_eq!(chain.head_hash(), head);

        let next = chain.append(fields("r2", "allow", "b")).unwrap();
        assert_eq!(next.previous_hash, head);
        assert!(chain.verify().unwrap().valid);
    }

    #[test]
    fn test_concurrent_appends_never_share_previous_hash() {
        let dir = TempDir::new().unwrap();
        let chain = Arc::new(open_chain(&dir));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let chain = chain.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        chain.append(fields(&format!("t{t}-{i}"), "allow", "x")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records: Vec<AuditRecord> = chain
            .get(&AuditFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let unique: std::collections::HashSet<_> = records.iter().map(|r| &r.previous_hash).collect();

        assert_eq!(records.len(), 160);
        assert_eq!(unique.len(), 160);
        assert!(chain.verify().unwrap().valid);
    }

    #[test]
    fn test_get_filters_and_limits() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "block", "")).unwrap();
        chain.append(fields("r2", "allow", "")).unwrap();
        chain.append(fields("r3", "block", "")).unwrap();
        chain.append(AuditFields::event("policy_reload", "p1", json!({}))).unwrap();

        let blocks: Vec<String> = chain
            .get(&AuditFilter::all().with_action("block"))
            .unwrap()
            .map(|r| r.unwrap().request_id)
            .collect();
        assert_eq!(blocks, vec!["r1", "r3"]);

        let limited: Vec<String> = chain
            .get(&AuditFilter::all().with_limit(2))
            .unwrap()
            .map(|r| r.unwrap().request_id)
            .collect();
        assert_eq!(limited, vec!["r1", "r2"]);

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(chain.get(&AuditFilter::all().with_date(today)).unwrap().count(), 4);
        assert_eq!(chain.get(&AuditFilter::all().with_date("1999-")).unwrap().count(), 0);
    }

    #[test]
    fn test_get_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "allow", "")).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(chain.path()).unwrap();
            writeln!(file, "not a record").unwrap();
        }
        let reopened = AuditChain::open(chain.path()).unwrap();
        reopened.append(fields("r2", "allow", "")).unwrap();

        let ids: Vec<String> = reopened
            .get(&AuditFilter::all())
            .unwrap()
            .map(|r| r.unwrap().request_id)
            .collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        // the chain itself is reported broken at the bad line
        let report = reopened.verify().unwrap();
        assert_eq!(report.break_point, Some(1));
    }

    #[test]
    fn test_storage_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "allow", "")).unwrap();
        let head = chain.head_hash();

        chain.break_storage();

        let result = chain.append(fields("r2", "block", ""));
        assert!(matches!(result, Err(AuditError::Storage(_))));
        assert_eq!(chain.head_hash(), head);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_failed_sync_rolls_back_the_line() {
        let dir = TempDir::new().unwrap();
        let chain = AuditChain::open(dir.path().join("audit.jsonl")).unwrap();
        let r0 = chain.append(fields("r0", "allow", "")).unwrap();

        chain.fail_sync(true);
        let result = chain.append(fields("r1", "block", ""));
        assert!(matches!(result, Err(AuditError::Storage(_))));
        assert_eq!(fs::read_to_string(chain.path()).unwrap().lines().count(), 1);

        chain.restore_storage();
        let r2 = chain.append(fields("r2", "allow", "")).unwrap();
        assert_eq!(r2.previous_hash, r0.content_hash);
        assert_eq!(fs::read_to_string(chain.path()).unwrap().lines().count(), 2);

        let report = chain.verify().unwrap();
        assert!(report.valid);
        assert_eq!(report.total, 2);
    }

    #[test]
    fn test_unrecoverable_append_refuses_further_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let chain = AuditChain::open(&path).unwrap();
        chain.append(fields("r0", "allow", "")).unwrap();

        chain.fail_sync(false);
        assert!(chain.append(fields("r1", "block", "")).is_err());

        chain.restore_storage();
        assert!(matches!(
            chain.append(fields("r2", "allow", "")),
            Err(AuditError::Storage(_))
        ));
        drop(chain);

        // Reopening picks up the stray record as the head
        let reopened = AuditChain::open(&path).unwrap();
        let r2 = reopened.append(fields("r2", "allow", "")).unwrap();
        let records: Vec<AuditRecord> = reopened
            .get(&AuditFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(r2.previous_hash, records[1].content_hash);
        assert!(reopened.verify().unwrap().valid);
    }

    #[test]
    fn test_verify_walks_lines_written_behind_the_chain() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        let r0 = chain.append(fields("r0", "allow", "")).unwrap();
        chain.append(fields("r1", "allow", "")).unwrap();

        // A second record claiming the same parent as r1
        let mut forked = r0.clone();
        forked.request_id = "forged".to_string();
        forked.previous_hash = r0.content_hash.clone();
        forked.seal().unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(chain.path()).unwrap();
            writeln!(file, "{}", serde_json::to_string(&forked).unwrap()).unwrap();
        }
        assert_eq!(chain.len(), 2);

        let report = chain.verify().unwrap();
        assert!(!report.valid);
        assert_eq!(report.total, 3);
        assert_eq!(report.break_point, Some(2));
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "allow", "")).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(chain.path()).unwrap();
            file.write_all(b"\xff\xfe garbage\n").unwrap();
        }

        let reopened = AuditChain::open(chain.path()).unwrap().without_sync();
        assert_eq!(reopened.len(), 2);
        reopened.append(fields("r2", "allow", "")).unwrap();

        let ids: Vec<String> = reopened
            .get(&AuditFilter::all())
            .unwrap()
            .map(|r| r.unwrap().request_id)
            .collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        let report = reopened.verify().unwrap();
        assert!(!report.valid);
        assert_eq!(report.total, 3);
        assert_eq!(report.break_point, Some(1));
    }

    #[test]
    fn test_redacting_first_record_relinks_everything_after() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        for i in 0..4 {
            chain.append(fields(&format!("r{i}"), "block", "SSN 123-45-6789")).unwrap();
        }
        let redactor = Redactor::new(&[RedactionPattern {
            name: "ssn".to_string(),
            pattern: r"\d{3}-\d{2}-\d{4}".to_string(),
            replacement: None,
        }])
        .unwrap();

        let outcome = chain.redact("r0", &redactor, "ops").unwrap();
        assert_eq!(outcome.records_rewritten, 1);

        let records: Vec<AuditRecord> = chain
            .get(&AuditFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].text_excerpt, "SSN [REDACTED:ssn]");
        assert_eq!(records[3].text_excerpt, "SSN 123-45-6789");
        for pair in records.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].content_hash);
        }
        assert_eq!(chain.len(), 5);
        assert!(chain.verify().unwrap().valid);
    }

    #[test]
    fn test_export_pairs_records_with_verification() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "block", "a")).unwrap();
        chain.append(fields("r2", "allow", "b")).unwrap();

        let json_export = chain
            .export(&AuditFilter::all().with_action("block"), ExportFormat::Json)
            .unwrap();
        assert_eq!(json_export.record_count, 1);
        assert!(json_export.verification.valid);
        assert_eq!(json_export.verification.total, 2);

        let csv_export = chain.export(&AuditFilter::all(), ExportFormat::Csv).unwrap();
        let text = String::from_utf8(csv_export.content).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_redaction_rewrites_and_is_audited() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "allow", "nothing")).unwrap();
        chain.append(fields("r2", "block", "SSN 123-45-6789")).unwrap();
        chain.append(fields("r3", "allow", "later")).unwrap();
        let prior_head = chain.head_hash();

        let redactor = Redactor::new(&[RedactionPattern {
            name: "ssn".to_string(),
            pattern: r"\d{3}-\d{2}-\d{4}".to_string(),
            replacement: None,
        }])
        .unwrap();

        let outcome = chain.redact("r2", &redactor, "ops@example").unwrap();
        assert_eq!(outcome.records_rewritten, 1);
        assert_eq!(outcome.record.action, "redaction");
        assert_eq!(outcome.record.metadata["prior_head_hash"], prior_head.as_str());
        assert_eq!(outcome.record.metadata["target_request_id"], "r2");

        let records: Vec<AuditRecord> = chain
            .get(&AuditFilter::all())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[1].text_excerpt, "SSN [REDACTED:ssn]");
        assert_eq!(records[0].text_excerpt, "nothing");

        let report = chain.verify().unwrap();
        assert!(report.valid);
        assert_eq!(report.total, 4);

        // appends after redaction keep linking
        let next = chain.append(fields("r4", "allow", "")).unwrap();
        assert_eq!(next.previous_hash, outcome.record.content_hash);
        assert!(chain.verify().unwrap().valid);
    }

    #[test]
    fn test_redaction_refuses_broken_chain_and_unknown_request() {
        let dir = TempDir::new().unwrap();
        let chain = open_chain(&dir);
        chain.append(fields("r1", "allow", "a")).unwrap();
        chain.append(fields("r2", "allow", "b")).unwrap();

        let redactor = Redactor::default();
        assert!(matches!(
            chain.redact("missing", &redactor, "ops"),
            Err(AuditError::NotFound(_))
        ));

        tamper(chain.path(), 0, "content_hash");
        assert!(matches!(
            chain.redact("r2", &redactor, "ops"),
            Err(AuditError::ChainIntegrity { .. })
        ));
    }
}
