//! Sink trait for log output destinations
//!
//! A sink receives fully rendered bytes. The direct path writes into it under
//! the logger's output mutex; a [`BufferedWriter`](super::buffered_writer::BufferedWriter)
//! owns its sink exclusively on the flush thread.

use std::io;

pub trait Sink: Send {
    /// Write the whole payload
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Release the destination; defaults to a flush
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// Standard streams are never closed by the logger
    fn is_standard_stream(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

impl Sink for Box<dyn Sink> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn is_standard_stream(&self) -> bool {
        (**self).is_standard_stream()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
