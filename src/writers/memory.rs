//! In-memory and generic `io::Write` sinks

use crate::core::sink::Sink;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    writes: usize,
    flushes: usize,
    closed: bool,
}

/// Shared in-memory sink
///
/// Clones share the same buffer, so one handle can be given to the logger and
/// another kept for inspection. Counts physical writes, which makes batching
/// observable.
///
/// # Example
///
/// ```
/// use pooled_logger::writers::MemorySink;
/// use pooled_logger::Sink;
///
/// let sink = MemorySink::new();
/// let mut handle = sink.clone();
/// handle.write_all(b"hello").unwrap();
/// assert_eq!(sink.contents(), b"hello");
/// assert_eq!(sink.write_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    standard: bool,
    failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report as a standard stream so it is never closed by its owner
    #[must_use]
    pub fn as_standard_stream(mut self) -> Self {
        self.standard = true;
        self
    }

    /// Reject every write with an I/O error
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    pub fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().data).into_owned()
    }

    /// Non-empty lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.contents_string()
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Number of `write_all` calls received
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.data.clear();
        state.writes = 0;
    }
}

impl Sink for MemorySink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.failing {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory sink rejects writes"));
        }
        let mut state = self.state.lock();
        state.data.extend_from_slice(buf);
        state.writes += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn is_standard_stream(&self) -> bool {
        self.standard
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Adapter turning any `io::Write` into a [`Sink`]
///
/// # Example
///
/// ```no_run
/// use pooled_logger::writers::WriterSink;
///
/// let file = std::fs::File::create("/tmp/app.log").unwrap();
/// let sink = WriterSink::new("app-file", file);
/// ```
pub struct WriterSink<W: Write + Send> {
    name: String,
    inner: Option<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(name: impl Into<String>, inner: W) -> Self {
        Self {
            name: name.into(),
            inner: Some(inner),
        }
    }

    /// Give back the wrapped writer, unless already closed
    pub fn into_inner(mut self) -> Option<W> {
        self.inner.take()
    }

    fn inner(&mut self) -> io::Result<&mut W> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, format!("sink '{}' is closed", self.name)))
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.flush(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shared_between_clones() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_all(b"a\n").unwrap();
        writer.write_all(b"b\n").unwrap();
        writer.close().unwrap();

        assert_eq!(sink.lines(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(sink.write_count(), 2);
        assert!(sink.is_closed());

        sink.clear();
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_failing_memory_sink() {
        let mut sink = MemorySink::new().failing();
        assert!(sink.write_all(b"x").is_err());
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_writer_sink_close() {
        let mut sink = WriterSink::new("vec", Vec::new());
        sink.write_all(b"data").unwrap();
        assert_eq!(sink.name(), "vec");
        sink.close().unwrap();
        assert!(sink.write_all(b"more").is_err());
        assert!(sink.close().is_ok());
        assert!(sink.into_inner().is_none());
    }
}
