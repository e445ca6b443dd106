use crate::records::record::Record;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Appends records to a file as newline-delimited JSON.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it when missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open record sink {}", path.display()))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub async fn write(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .with_context(|| format!("failed to serialize record {}", record.id))?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered lines; returns the number of records written.
    pub async fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .await
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(self.written)
    }
}
