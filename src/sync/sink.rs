use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use log::{info, warn};

/// Destination for the messages a Get retrieves.
pub trait OutputSink {
    fn write(
        &mut self,
        subject: &str,
        extension: &str,
        timestamp: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> Result<()>;
}

/// Writes each message to `<dir>/<subject>.<ext>` and stamps it with the message date.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;
        Ok(FileSink { dir })
    }

    pub fn path_for(&self, subject: &str, extension: &str) -> PathBuf {
        // Subjects are file names, never paths
        let name: String = subject
            .chars()
            .map(|c| if std::path::is_separator(c) { '_' } else { c })
            .collect();
        if extension.is_empty() {
            self.dir.join(name)
        } else {
            self.dir.join(format!("{}.{}", name, extension))
        }
    }
}

fn set_modified(path: &Path, timestamp: DateTime<FixedOffset>) -> std::io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(SystemTime::from(timestamp))
}

impl OutputSink for FileSink {
    fn write(
        &mut self,
        subject: &str,
        extension: &str,
        timestamp: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> Result<()> {
        let path = self.path_for(subject, extension);
        fs::write(&path, content).with_context(|| format!("on subject[{}]: cannot write {}", subject, path.display()))?;
        info!("-- wrote {}", path.display());

        // The file is already written; a wrong timestamp is not worth failing over
        if let Some(timestamp) = timestamp {
            if let Err(e) = set_modified(&path, timestamp) {
                warn!(
                    "on subject[{}]: failed to change timestamp of {}: {}",
                    subject,
                    path.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

/// Copies every message into one continuous writer, such as stdout.
pub struct StreamSink<W: Write> {
    writer: W,
}

impl<W: Write> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        StreamSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for StreamSink<W> {
    fn write(
        &mut self,
        _subject: &str,
        _extension: &str,
        _timestamp: Option<DateTime<FixedOffset>>,
        content: &[u8],
    ) -> Result<()> {
        self.writer.write_all(content)?;
        self.writer.flush()?;
        Ok(())
    }
}
