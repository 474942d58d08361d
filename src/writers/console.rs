//! Standard stream sinks

use crate::core::sink::Sink;
use std::io::{self, Write};

/// Process stdout; never closed by the logger
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for StdoutSink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::stdout().lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }

    fn is_standard_stream(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Process stderr; never closed by the logger
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl StderrSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for StderrSink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::stderr().lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }

    fn is_standard_stream(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "stderr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_streams_flagged() {
        assert!(StdoutSink::new().is_standard_stream());
        assert!(StderrSink::new().is_standard_stream());
        assert_eq!(StdoutSink.name(), "stdout");
        assert!(StderrSink.flush().is_ok());
    }
}
