//! Concrete sinks and the built-in file hook

pub mod console;
pub mod file_hook;
pub mod memory;
pub mod rotating_file;

pub use console::{StderrSink, StdoutSink};
pub use file_hook::FileHook;
pub use memory::{MemorySink, WriterSink};
pub use rotating_file::{RotatingFileWriter, RotationPolicy};
