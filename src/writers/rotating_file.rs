//! Rotating file sink
//!
//! Rotates by size, by age, or by whichever limit is reached first. The active
//! file is renamed to `<name>.1`, older backups shift up by one, and backups
//! past `max_backups` are deleted. Rotated files can be gzip-compressed.

use crate::core::error::{LoggerError, Result};
use crate::core::sink::Sink;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// When to rotate and what to keep
///
/// # Examples
///
/// ```
/// use pooled_logger::writers::RotationPolicy;
/// use std::time::Duration;
///
/// let policy = RotationPolicy::new()
///     .with_max_bytes(50 * 1024 * 1024)
///     .with_max_age(Duration::from_secs(24 * 3600))
///     .with_max_backups(7)
///     .with_compression(true);
/// assert_eq!(policy.max_age(), Some(Duration::from_secs(86_400)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationPolicy {
    /// Rotate before a write would push the file past this size
    pub max_bytes: Option<u64>,
    /// Rotate once the active file is older than this
    pub max_age_secs: Option<u64>,
    /// Rotated files kept on disk
    pub max_backups: usize,
    /// Gzip rotated files
    pub compress: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: Some(10 * 1024 * 1024),
            max_age_secs: None,
            max_backups: 5,
            compress: false,
        }
    }
}

impl RotationPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never rotate
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_bytes: None,
            max_age_secs: None,
            ..Self::default()
        }
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age_secs = Some(age.as_secs());
        self
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

/// File sink with rotation
///
/// # Examples
///
/// ```no_run
/// use pooled_logger::writers::{RotatingFileWriter, RotationPolicy};
///
/// let policy = RotationPolicy::new().with_max_bytes(1024 * 1024).with_max_backups(3);
/// let writer = RotatingFileWriter::with_policy("/var/log/app.log", policy).unwrap();
/// ```
pub struct RotatingFileWriter {
    base_path: PathBuf,
    policy: RotationPolicy,
    writer: Option<BufWriter<File>>,
    current_size: u64,
    opened_at: SystemTime,
    name: String,
}

impl RotatingFileWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_policy(path, RotationPolicy::default())
    }

    /// Open (or create) `path` for appending
    pub fn with_policy<P: AsRef<Path>>(path: P, policy: RotationPolicy) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        if let Some(parent) = base_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LoggerError::io_operation(
                        "create log directory",
                        format!("Failed to create directory '{}'", parent.display()),
                        e,
                    )
                })?;
            }
        }

        let (file, current_size, opened_at) = open_append(&base_path)?;
        let name = format!("rotating_file:{}", base_path.display());

        Ok(Self {
            base_path,
            policy,
            writer: Some(BufWriter::new(file)),
            current_size,
            opened_at,
            name,
        })
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        let size_exceeded = self.policy.max_bytes.is_some_and(|max| {
            self.current_size > 0 && self.current_size + incoming as u64 > max
        });
        let age_exceeded = self.policy.max_age().is_some_and(|max| {
            SystemTime::now()
                .duration_since(self.opened_at)
                .unwrap_or(Duration::ZERO)
                >= max
        });
        size_exceeded || age_exceeded
    }

    /// Rotate now, regardless of the policy limits
    pub fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| {
                LoggerError::file_rotation(
                    self.base_path.display().to_string(),
                    format!("Failed to flush before rotation: {}", e),
                )
            })?;
        }

        if self.policy.max_backups == 0 {
            // Nothing is kept; start the file over
            let _ = fs::remove_file(&self.base_path);
        } else {
            let oldest = self.backup_path(self.policy.max_backups);
            for path in [gz_path(&oldest), oldest] {
                if path.exists() {
                    fs::remove_file(&path).map_err(|e| {
                        LoggerError::file_rotation(
                            path.display().to_string(),
                            format!("Failed to remove oldest backup: {}", e),
                        )
                    })?;
                }
            }

            for i in (1..self.policy.max_backups).rev() {
                let from = self.backup_path(i);
                let to = self.backup_path(i + 1);
                for (from, to) in [(gz_path(&from), gz_path(&to)), (from, to)] {
                    if from.exists() {
                        fs::rename(&from, &to).map_err(|e| {
                            LoggerError::file_rotation(
                                from.display().to_string(),
                                format!("Failed to shift backup: {}", e),
                            )
                        })?;
                    }
                }
            }

            let first = self.backup_path(1);
            if self.base_path.exists() {
                fs::rename(&self.base_path, &first).map_err(|e| {
                    LoggerError::file_rotation(
                        self.base_path.display().to_string(),
                        format!("Failed to rotate current log file: {}", e),
                    )
                })?;
                if self.policy.compress {
                    compress_file(&first)?;
                }
            }
        }

        let (file, size, opened_at) = open_append(&self.base_path)?;
        self.writer = Some(BufWriter::new(file));
        self.current_size = size;
        self.opened_at = opened_at;
        Ok(())
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let filename = self
            .base_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("app.log");
        self.base_path.with_file_name(format!("{}.{}", filename, index))
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }
}

fn open_append(path: &Path) -> Result<(File, u64, SystemTime)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            LoggerError::io_operation("open log file", path.display().to_string(), e)
        })?;
    let size = file
        .metadata()
        .map_err(|e| LoggerError::io_operation("read log file metadata", path.display().to_string(), e))?
        .len();
    // An existing file's age counts from when this process opened it
    Ok((file, size, SystemTime::now()))
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress through a temporary file; the original is removed only on success
fn compress_file(path: &Path) -> Result<()> {
    let final_path = gz_path(path);
    let mut tmp_name = final_path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let compress = || -> io::Result<()> {
        let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
        let output = BufWriter::with_capacity(64 * 1024, File::create(&tmp_path)?);
        let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.flush()?;
        fs::rename(&tmp_path, &final_path)
    };

    if let Err(e) = compress() {
        let _ = fs::remove_file(&tmp_path);
        return Err(LoggerError::io_operation(
            "compress log file",
            path.display().to_string(),
            e,
        ));
    }

    if let Err(e) = fs::remove_file(path) {
        eprintln!(
            "[LOGGER ERROR] Compressed {} but could not remove the original: {}",
            path.display(),
            e
        );
    }
    Ok(())
}

impl Sink for RotatingFileWriter {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.should_rotate(buf.len()) {
            if let Err(e) = self.rotate() {
                eprintln!("[LOGGER ERROR] Log rotation failed: {}. Continuing with current file.", e);
                if self.writer.is_none() {
                    let (file, size, opened_at) = open_append(&self.base_path)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                    self.writer = Some(BufWriter::new(file));
                    self.current_size = size;
                    self.opened_at = opened_at;
                }
                // Avoid retrying on every write
                self.current_size = 0;
                self.opened_at = SystemTime::now();
            }
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "rotating file writer is closed"))?;
        writer.write_all(buf)?;
        self.current_size += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RotatingFileWriter {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;
    use tempfile::tempdir;

    fn backups(dir: &Path, prefix: &str) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with(prefix) && name != prefix
            })
            .count()
    }

    #[test]
    fn test_policy_builder() {
        let policy = RotationPolicy::new()
            .with_max_bytes(1024)
            .with_max_backups(3)
            .with_compression(true);
        assert_eq!(policy.max_bytes, Some(1024));
        assert_eq!(policy.max_backups, 3);
        assert!(policy.compress);
        assert_eq!(policy.max_age(), None);
        assert_eq!(RotationPolicy::never().max_bytes, None);
    }

    #[test]
    fn test_policy_deserialize_partial() {
        let policy: RotationPolicy = serde_json::from_str(r#"{"max_backups":2}"#).unwrap();
        assert_eq!(policy.max_backups, 2);
        assert_eq!(policy.max_bytes, Some(10 * 1024 * 1024));
    }

    #[test]
    fn test_size_rotation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("size.log");
        let policy = RotationPolicy::new().with_max_bytes(100).with_max_backups(3);
        let mut writer = RotatingFileWriter::with_policy(&path, policy).unwrap();

        for i in 0..20 {
            writer
                .write_all(format!("Test message number {}\n", i).as_bytes())
                .unwrap();
        }
        writer.flush().unwrap();

        assert!(path.with_file_name("size.log.1").exists());
        assert!(writer.current_size() <= 100);
        assert!(backups(dir.path(), "size.log") <= 3);
    }

    #[test]
    fn test_age_rotation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("age.log");
        let policy = RotationPolicy::never()
            .with_max_age(Duration::ZERO)
            .with_max_backups(2);
        let mut writer = RotatingFileWriter::with_policy(&path, policy).unwrap();

        writer.write_all(b"first\n").unwrap();
        thread::sleep(Duration::from_millis(5));
        writer.write_all(b"second\n").unwrap();
        writer.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[test]
    fn test_never_rotates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.log");
        let mut writer = RotatingFileWriter::with_policy(&path, RotationPolicy::never()).unwrap();

        for i in 0..100 {
            writer.write_all(format!("Entry {}\n", i).as_bytes()).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(backups(dir.path(), "never.log"), 0);
    }

    #[test]
    fn test_compressed_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gz.log");
        let policy = RotationPolicy::new()
            .with_max_bytes(10)
            .with_max_backups(2)
            .with_compression(true);
        let mut writer = RotatingFileWriter::with_policy(&path, policy).unwrap();

        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"next\n").unwrap();
        writer.close().unwrap();

        let gz = path.with_file_name("gz.log.1.gz");
        assert!(gz.exists());
        assert!(!path.with_file_name("gz.log.1").exists());

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(File::open(gz).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "0123456789");
    }

    #[test]
    fn test_backups_capped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multi.log");
        let policy = RotationPolicy::new().with_max_bytes(20).with_max_backups(2);
        let mut writer = RotatingFileWriter::with_policy(&path, policy).unwrap();

        for i in 0..50 {
            writer.write_all(format!("Entry {}\n", i).as_bytes()).unwrap();
        }
        writer.close().unwrap();

        assert_eq!(backups(dir.path(), "multi.log"), 2);
    }
}
