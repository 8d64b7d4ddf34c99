//! Byte sources for reelplay
//!
//! The decode engine pulls container data through the `DataSource` trait
//! and must not assume anything beyond it: a source is a sequential,
//! seekable byte provider with a known total size. Both a buffered
//! file-backed source and a fully preloaded in-memory source are
//! provided.

use crate::utils::error::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Abstract byte provider for container data
///
/// A return of 0 from `read` signals end-of-stream.
pub trait DataSource: Send {
    /// Read up to `buf.len()` bytes, returning the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seek to an absolute byte offset
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Total size of the stream in bytes
    fn size(&self) -> u64;

    /// Current read position
    fn tell(&self) -> u64;

    /// Human-readable label used in log output
    fn repr(&self) -> String;
}

/// File-backed byte source with buffered reads
pub struct FileSource {
    reader: BufReader<File>,
    path: PathBuf,
    size: u64,
    position: u64,
}

impl FileSource {
    /// Open a file as a data source
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            path,
            size,
            position: 0,
        })
    }
}

impl DataSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.reader.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn repr(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fully preloaded in-memory byte source
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
    label: String,
}

impl MemorySource {
    /// Wrap a byte buffer as a data source
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            label: "<memory>".to_string(),
        }
    }

    /// Wrap a byte buffer with a label used in log output
    pub fn with_label(data: Vec<u8>, label: impl Into<String>) -> Self {
        Self {
            data,
            position: 0,
            label: label.into(),
        }
    }

    /// Preload an entire file into memory
    pub fn preload<P: AsRef<Path>>(path: P) -> Result<Self> {
        let label = path.as_ref().display().to_string();
        let data = std::fs::read(path)?;
        Ok(Self {
            data,
            position: 0,
            label,
        })
    }
}

impl DataSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.data.len() - self.position;
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.position = (offset as usize).min(self.data.len());
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn tell(&self) -> u64 {
        self.position as u64
    }

    fn repr(&self) -> String {
        self.label.clone()
    }
}
