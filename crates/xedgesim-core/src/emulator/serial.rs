//! Incremental reader for the emulator's serial-backend file.
//!
//! The emulator appends raw serial-port bytes to a regular file; this
//! reader tracks a byte offset and returns the complete LF-terminated
//! lines appended since the previous read. A partial trailing line is
//! carried over to the next read.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Offset-tracking tail over the serial-backend file.
#[derive(Debug)]
pub struct SerialTail {
    path: PathBuf,
    offset: u64,
    carry: Vec<u8>,
}

impl SerialTail {
    /// Tail the file at `path` from its beginning.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SerialTail {
            path: path.into(),
            offset: 0,
            carry: Vec::new(),
        }
    }

    /// The file being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The byte offset of the next read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read all complete lines appended since the last call.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = Vec::new();
        let read = file.read_to_end(&mut chunk)?;
        self.offset += read as u64;
        self.carry.extend_from_slice(&chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.carry.drain(..=pos).collect();
            let mut line = &raw[..raw.len() - 1];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
        }
        Ok(lines)
    }
}
