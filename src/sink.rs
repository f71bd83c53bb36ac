//! Durable append sink for accepted log records.
//!
//! The sink is an external collaborator from the event loop's point of view:
//! it is opened before the server starts, and a write failure is fatal to
//! the connection that produced the record, never to the sink or process.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// An append-only byte destination for formatted log records.
pub trait LogSink {
    /// Append one record. The record already carries its terminator.
    fn append(&mut self, record: &[u8]) -> io::Result<()>;
}

/// File-backed sink: append + create, flushed per record.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Open (or create) the log file in append mode.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<FileSink> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(FileSink { file })
    }
}

impl LogSink for FileSink {
    fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.file.write_all(record)?;
        self.file.flush()
    }
}

/// In-memory sink for tests.
impl LogSink for Vec<u8> {
    fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.extend_from_slice(record);
        Ok(())
    }
}
