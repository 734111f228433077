use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{EventSink, SinkError};

/// Appends each event as one JSON line.
#[derive(Debug)]
pub struct FileSink {
    name: String,
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(FileSink {
            name: name.into(),
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, batch: &[Value]) -> Result<(), SinkError> {
        let mut buffer = Vec::with_capacity(batch.len() * 256);
        for event in batch {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&buffer)?;
        file.flush()?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, batch: &[Value]) -> Result<(), SinkError> {
        self.append(batch)
    }
}
