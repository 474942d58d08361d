//! Built-in hook appending JSON lines to a file

use crate::core::error::{LoggerError, Result};
use crate::core::formatter::{Formatter, JsonFormatter};
use crate::core::hook::Hook;
use crate::core::log_entry::LogEntry;
use crate::core::log_level::LogLevel;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Copies entries at or above `level` to a file, one JSON object per line
///
/// # Example
///
/// ```no_run
/// use pooled_logger::writers::FileHook;
/// use pooled_logger::LogLevel;
///
/// let hook = FileHook::open("/var/log/app-errors.json", LogLevel::Error).unwrap();
/// ```
pub struct FileHook {
    path: PathBuf,
    level: LogLevel,
    formatter: JsonFormatter,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileHook {
    pub fn open<P: AsRef<Path>>(path: P, level: LogLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LoggerError::io_operation("open hook file", path.display().to_string(), e))?;

        Ok(Self {
            path,
            level,
            formatter: JsonFormatter::new(),
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

impl Hook for FileHook {
    fn fire(&self, entry: &LogEntry) -> Result<()> {
        if entry.level < self.level {
            return Ok(());
        }

        let mut line = Vec::with_capacity(256);
        self.formatter.format(&mut line, entry)?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(LoggerError::WriterClosed)?;
        writer.write_all(&line)?;
        // Hooked entries are rare and usually important
        writer.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer
                .flush()
                .map_err(|e| LoggerError::io_operation("closing hook file", self.path.display().to_string(), e))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file_hook"
    }
}
