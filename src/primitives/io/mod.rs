#![forbid(unsafe_code)]
//! Positioned file I/O with a disk backend and an in-memory backend.

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind, IoSlice},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;

use crate::types::{Result, TdbError};

pub mod location;

pub use location::Location;

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`; short files are an `UnexpectedEof` error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the file as needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Writes multiple buffers back to back starting at `off`.
    fn writev_at(&self, mut off: u64, bufs: &[IoSlice<'_>]) -> Result<()> {
        for slice in bufs {
            if slice.is_empty() {
                continue;
            }
            self.write_at(off, slice)?;
            off = off
                .checked_add(slice.len() as u64)
                .ok_or(TdbError::Invalid("writev offset overflow"))?;
        }
        Ok(())
    }
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to the specified length.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// Disk file accessed with pread/pwrite semantics.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn pread(&self, dst: &mut [u8], off: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&*self.inner, dst, off)
    }

    #[cfg(windows)]
    fn pread(&self, dst: &mut [u8], off: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&*self.inner, dst, off)
    }

    #[cfg(unix)]
    fn pwrite(&self, src: &[u8], off: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(&*self.inner, src, off)
    }

    #[cfg(windows)]
    fn pwrite(&self, src: &[u8], off: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(&*self.inner, src, off)
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match self.pread(dst, off) {
                Ok(0) => {
                    return Err(io::Error::new(ErrorKind::UnexpectedEof, "read reached EOF").into())
                }
                Ok(read) => {
                    dst = &mut dst[read..];
                    off += read as u64;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            match self.pwrite(src, off) {
                Ok(0) => {
                    return Err(io::Error::new(ErrorKind::WriteZero, "write wrote zero bytes").into())
                }
                Ok(written) => {
                    src = &src[written..];
                    off += written as u64;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(TdbError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(TdbError::from)
    }
}

/// Growable in-memory file used for scratch space and in-memory stores.
#[derive(Default)]
pub struct MemFileIo {
    bytes: RwLock<Vec<u8>>,
    read_only: AtomicBool,
}

impl MemFileIo {
    /// Creates an empty in-memory file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current contents out.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Replaces the contents wholesale.
    pub fn replace(&self, bytes: Vec<u8>) {
        *self.bytes.write() = bytes;
    }

    /// While set, writes and truncates fail with `PermissionDenied`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "in-memory file is read-only").into());
        }
        Ok(())
    }
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        let start = usize::try_from(off).map_err(|_| TdbError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "read reached EOF"))?;
        dst.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut bytes = self.bytes.write();
        let start = usize::try_from(off).map_err(|_| TdbError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(src.len())
            .ok_or(TdbError::Invalid("write offset overflow"))?;
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.check_writable()?;
        let len = usize::try_from(len).map_err(|_| TdbError::Invalid("length overflow"))?;
        self.bytes.write().resize(len, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = StdFileIo::open(&path).unwrap();

        let payload = b"hello mundo";
        io.write_at(0, payload).unwrap();
        io.sync_all().unwrap();

        let mut buf = vec![0u8; payload.len()];
        io.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, payload);
        assert_eq!(io.len().unwrap(), payload.len() as u64);
    }

    #[test]
    fn read_past_eof_returns_error() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin")).unwrap();
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf).unwrap_err() {
            TdbError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reopen_sees_synced_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io_roundtrip.bin");
        {
            let io = StdFileIo::open(&path).unwrap();
            io.write_at(0, &[42u8; 8192]).unwrap();
            io.sync_all().unwrap();
        }
        let reopen = StdFileIo::new(OpenOptions::new().read(true).write(true).open(&path).unwrap());
        let mut buf = vec![0u8; 8192];
        reopen.read_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 42));
    }

    #[test]
    fn mem_file_grows_and_truncates() {
        let io = MemFileIo::new();
        io.write_at(4, b"abcd").unwrap();
        assert_eq!(io.len().unwrap(), 8);
        let mut buf = [0u8; 4];
        io.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        io.truncate(2).unwrap();
        assert!(io.read_at(0, &mut buf).is_err());
        assert_eq!(io.contents(), vec![0, 0]);
    }

    #[test]
    fn read_only_mem_file_rejects_writes() {
        let io = MemFileIo::new();
        io.write_at(0, b"kept").unwrap();
        io.set_read_only(true);
        match io.write_at(4, b"lost").unwrap_err() {
            TdbError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::PermissionDenied),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(io.truncate(0).is_err());
        io.set_read_only(false);
        io.write_at(4, b"more").unwrap();
        assert_eq!(io.contents(), b"keptmore".to_vec());
    }
}
