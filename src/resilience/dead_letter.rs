use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// A batch that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub target_name: String,
    pub original_batch: Vec<Value>,
    pub failure_reason: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        target_name: impl Into<String>,
        original_batch: Vec<Value>,
        failure_reason: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        DeadLetterEntry {
            id: Uuid::new_v4(),
            target_name: target_name.into(),
            original_batch,
            failure_reason: failure_reason.into(),
            retry_count,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dead-letter serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable holding area for undeliverable batches, keyed by target.
pub trait DeadLetterStore: Send + Sync {
    fn push(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError>;

    /// Oldest first, up to `limit` entries.
    fn list(&self, target: &str, limit: Option<usize>) -> Result<Vec<DeadLetterEntry>, DeadLetterError>;

    /// Remove entries by id, returning how many were removed.
    fn remove(&self, target: &str, ids: &[Uuid]) -> Result<usize, DeadLetterError>;

    /// Returns false if no entry has this id.
    fn update_retry_count(&self, target: &str, id: Uuid, retry_count: u32) -> Result<bool, DeadLetterError>;

    /// Drop every entry for a target, returning how many were dropped.
    fn purge(&self, target: &str) -> Result<usize, DeadLetterError>;

    fn count(&self, target: &str) -> Result<usize, DeadLetterError>;

    fn targets(&self) -> Result<Vec<String>, DeadLetterError>;
}

/// In-process store, for tests and deployments without a dead-letter directory.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterStore {
    entries: Mutex<HashMap<String, Vec<DeadLetterEntry>>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        MemoryDeadLetterStore::default()
    }
}

impl DeadLetterStore for MemoryDeadLetterStore {
    fn push(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError> {
        self.entries
            .lock()
            .entry(entry.target_name.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    fn list(&self, target: &str, limit: Option<usize>) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let entries = self.entries.lock();
        let list = entries.get(target).map(Vec::as_slice).unwrap_or_default();
        Ok(list
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn remove(&self, target: &str, ids: &[Uuid]) -> Result<usize, DeadLetterError> {
        let mut entries = self.entries.lock();
        let Some(list) = entries.get_mut(target) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|e| !ids.contains(&e.id));
        Ok(before - list.len())
    }

    fn update_retry_count(&self, target: &str, id: Uuid, retry_count: u32) -> Result<bool, DeadLetterError> {
        let mut entries = self.entries.lock();
        let found = entries
            .get_mut(target)
            .and_then(|list| list.iter_mut().find(|e| e.id == id))
            .map(|entry| entry.retry_count = retry_count)
            .is_some();
        Ok(found)
    }

    fn purge(&self, target: &str) -> Result<usize, DeadLetterError> {
        Ok(self.entries.lock().remove(target).map_or(0, |list| list.len()))
    }

    fn count(&self, target: &str) -> Result<usize, DeadLetterError> {
        Ok(self.entries.lock().get(target).map_or(0, Vec::len))
    }

    fn targets(&self) -> Result<Vec<String>, DeadLetterError> {
        let mut targets: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        targets.sort();
        Ok(targets)
    }
}

/// One JSON-lines file per target under a directory.
///
/// Appends go straight to the file; removals rewrite it through a
/// temporary file and rename.
#[derive(Debug)]
pub struct FileDeadLetterStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileDeadLetterStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(FileDeadLetterStore {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target_path(&self, target: &str) -> PathBuf {
        let file_name: String = target
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.jsonl"))
    }

    fn read_entries(&self, path: &Path) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeadLetterEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no,
                        error = %e,
                        "Skipping malformed dead-letter line"
                    );
                }
            }
        }
        Ok(entries)
    }

    fn write_entries(&self, path: &Path, entries: &[DeadLetterEntry]) -> Result<(), DeadLetterError> {
        if entries.is_empty() {
            return match fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        let tmp_path = path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            for entry in entries {
                let line = serde_json::to_string(entry)?;
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl DeadLetterStore for FileDeadLetterStore {
    fn push(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterError> {
        let _guard = self.lock.lock();
        let path = self.target_path(&entry.target_name);
        let line = serde_json::to_string(&entry)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        file.sync_data()?;
        Ok(())
    }

    fn list(&self, target: &str, limit: Option<usize>) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries(&self.target_path(target))?;
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn remove(&self, target: &str, ids: &[Uuid]) -> Result<usize, DeadLetterError> {
        let _guard = self.lock.lock();
        let path = self.target_path(target);
        let mut entries = self.read_entries(&path)?;

        let before = entries.len();
        entries.retain(|e| !ids.contains(&e.id));
        let removed = before - entries.len();

        if removed > 0 {
            self.write_entries(&path, &entries)?;
        }
        Ok(removed)
    }

    fn update_retry_count(&self, target: &str, id: Uuid, retry_count: u32) -> Result<bool, DeadLetterError> {
        let _guard = self.lock.lock();
        let path = self.target_path(target);
        let mut entries = self.read_entries(&path)?;

        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        entry.retry_count = retry_count;

        self.write_entries(&path, &entries)?;
        Ok(true)
    }

    fn purge(&self, target: &str) -> Result<usize, DeadLetterError> {
        let _guard = self.lock.lock();
        let path = self.target_path(target);
        let count = self.read_entries(&path)?.len();
        self.write_entries(&path, &[])?;
        Ok(count)
    }

    fn count(&self, target: &str) -> Result<usize, DeadLetterError> {
        let _guard = self.lock.lock();
        Ok(self.read_entries(&self.target_path(target))?.len())
    }

    fn targets(&self) -> Result<Vec<String>, DeadLetterError> {
        let _guard = self.lock.lock();
        let mut targets = Vec::new();

        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(entry) = self.read_entries(&path)?.into_iter().next() {
                targets.push(entry.target_name);
            }
        }

        targets.sort();
        Ok(targets)
    }
}
