//! Container handles
//!
//! A document exclusively owns one open handle for its whole lifetime.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An open, seekable, truncatable byte store holding one document
pub trait Container: Read + Write + Seek {
    /// Cut (or extend with zeros) the container to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Flush and make durable
    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// Filesystem path, when the container is backed by a named file.
    /// Needed by the linked multi-file form to place its page files.
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Total length in bytes; leaves the position unchanged
    fn byte_len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }
}

impl Container for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflows usize"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// A container backed by a file on disk
#[derive(Debug)]
pub struct FileContainer {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl FileContainer {
    /// Open an existing file read-write, falling back to read-only
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Ok(Self {
                file,
                path: path.to_path_buf(),
                writable: true,
            }),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(Self {
                file: File::open(path)?,
                path: path.to_path_buf(),
                writable: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// Create (or truncate) a file for writing a new document
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable: true,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl Read for FileContainer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileContainer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileContainer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Container for FileContainer {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
