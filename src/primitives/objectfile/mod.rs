#![forbid(unsafe_code)]
//! Append-only storage of variable-length byte blobs addressed by offset.
//!
//! Each entry is a 4-byte big-endian length followed by the bytes. The offset
//! of the length prefix is the entry's id, so ids grow with every write and
//! never change once handed out.

use std::io::IoSlice;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::primitives::io::{FileIo, MemFileIo};
use crate::types::{Result, TdbError};

const LEN_PREFIX: u64 = 4;

struct ObjectState {
    end: u64,
    dirty: bool,
    closed: bool,
}

/// Append-only object file.
pub struct ObjectFile {
    name: Arc<str>,
    io: Arc<dyn FileIo>,
    state: Mutex<ObjectState>,
}

impl ObjectFile {
    /// Opens an object file over existing storage; the current length is the append point.
    pub fn open(io: Arc<dyn FileIo>, name: impl Into<Arc<str>>) -> Result<Self> {
        let end = io.len()?;
        let name = name.into();
        debug!(file = %name, end, "objectfile.open");
        Ok(Self {
            name,
            io,
            state: Mutex::new(ObjectState {
                end,
                dirty: false,
                closed: false,
            }),
        })
    }

    /// A scratch object file held entirely in memory.
    pub fn in_memory(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            io: Arc::new(MemFileIo::new()),
            state: Mutex::new(ObjectState {
                end: 0,
                dirty: false,
                closed: false,
            }),
        }
    }

    /// Logical name used in errors and journal references.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `bytes` and returns the offset of the new entry.
    pub fn write(&self, bytes: &[u8]) -> Result<u64> {
        let len = u32::try_from(bytes.len()).map_err(|_| TdbError::Invalid("object exceeds 4 GiB"))?;
        let mut state = self.state.lock();
        if state.closed {
            return Err(TdbError::Closed("object file"));
        }
        let offset = state.end;
        let prefix = len.to_be_bytes();
        self.io
            .writev_at(offset, &[IoSlice::new(&prefix), IoSlice::new(bytes)])?;
        state.end = offset + LEN_PREFIX + u64::from(len);
        state.dirty = true;
        trace!(file = %self.name, offset, len, "objectfile.write");
        Ok(offset)
    }

    /// Reads the entry written at `offset`.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let end = self.live_end()?;
        read_entry(&*self.io, &self.name, offset, end)
    }

    /// Offset the next write will return.
    pub fn len(&self) -> u64 {
        self.state.lock().end
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates every entry in write order. Each call starts from the beginning.
    pub fn all(&self) -> ObjectIter {
        self.all_from(0)
    }

    /// Iterates entries starting at a known entry boundary.
    pub fn all_from(&self, offset: u64) -> ObjectIter {
        ObjectIter {
            io: Arc::clone(&self.io),
            name: Arc::clone(&self.name),
            offset,
            end: self.len(),
        }
    }

    /// Flushes written entries to durable storage. `force` syncs even when clean.
    pub fn sync(&self, force: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TdbError::Closed("object file"));
        }
        if state.dirty || force {
            self.io.sync_all()?;
            state.dirty = false;
        }
        Ok(())
    }

    /// Discards everything at and after `len`. `len` must be an entry boundary.
    pub fn truncate_to(&self, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        if len > state.end {
            return Err(TdbError::Invalid("truncate beyond end of object file"));
        }
        self.io.truncate(len)?;
        state.end = len;
        state.dirty = true;
        Ok(())
    }

    /// Syncs and closes; later operations fail.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if state.dirty {
            self.io.sync_all()?;
        }
        state.closed = true;
        state.dirty = false;
        debug!(file = %self.name, end = state.end, "objectfile.close");
        Ok(())
    }

    fn live_end(&self) -> Result<u64> {
        let state = self.state.lock();
        if state.closed {
            return Err(TdbError::Closed("object file"));
        }
        Ok(state.end)
    }
}

fn read_entry(io: &dyn FileIo, name: &str, offset: u64, end: u64) -> Result<Vec<u8>> {
    let not_found = || TdbError::ObjectNotFound {
        file: name.to_owned(),
        offset,
    };
    if offset.checked_add(LEN_PREFIX).map_or(true, |head| head > end) {
        return Err(not_found());
    }
    let mut prefix = [0u8; LEN_PREFIX as usize];
    io.read_at(offset, &mut prefix)?;
    let len = u64::from(u32::from_be_bytes(prefix));
    if offset + LEN_PREFIX + len > end {
        return Err(TdbError::CorruptionAt {
            file: name.to_owned(),
            offset,
            reason: "object length runs past end of file",
        });
    }
    let mut bytes = vec![0u8; len as usize];
    io.read_at(offset + LEN_PREFIX, &mut bytes)?;
    Ok(bytes)
}

/// Lazy iterator over `(offset, bytes)` entries, bounded by the length at creation.
pub struct ObjectIter {
    io: Arc<dyn FileIo>,
    name: Arc<str>,
    offset: u64,
    end: u64,
}

impl ObjectIter {
    /// Offset of the next entry to be returned.
    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl Iterator for ObjectIter {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let offset = self.offset;
        match read_entry(&*self.io, &self.name, offset, self.end) {
            Ok(bytes) => {
                self.offset = offset + LEN_PREFIX + bytes.len() as u64;
                Some(Ok((offset, bytes)))
            }
            Err(err) => {
                self.offset = self.end;
                let err = match err {
                    TdbError::ObjectNotFound { file, offset } => TdbError::CorruptionAt {
                        file,
                        offset,
                        reason: "truncated object header",
                    },
                    other => other,
                };
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::StdFileIo;
    use tempfile::tempdir;

    #[test]
    fn offsets_increase_and_read_back() -> Result<()> {
        let file = ObjectFile::in_memory("nodes");
        let a = file.write(b"alpha")?;
        let b = file.write(b"")?;
        let c = file.write(b"gamma")?;
        assert!(a < b && b < c);
        assert_eq!(file.read(a)?, b"alpha");
        assert_eq!(file.read(b)?, b"");
        assert_eq!(file.read(c)?, b"gamma");
        Ok(())
    }

    #[test]
    fn read_past_end_is_not_found() -> Result<()> {
        let file = ObjectFile::in_memory("nodes");
        file.write(b"x")?;
        let end = file.len();
        assert!(matches!(
            file.read(end),
            Err(TdbError::ObjectNotFound { offset, .. }) if offset == end
        ));
        Ok(())
    }

    #[test]
    fn all_is_restartable_and_ordered() -> Result<()> {
        let file = ObjectFile::in_memory("nodes");
        let written: Vec<u64> = ["a", "bb", "ccc"]
            .iter()
            .map(|s| file.write(s.as_bytes()))
            .collect::<Result<_>>()?;
        for _ in 0..2 {
            let seen: Vec<(u64, Vec<u8>)> = file.all().collect::<Result<_>>()?;
            assert_eq!(seen.len(), 3);
            assert_eq!(seen.iter().map(|(o, _)| *o).collect::<Vec<_>>(), written);
            assert_eq!(seen[2].1, b"ccc");
        }
        Ok(())
    }

    #[test]
    fn iterator_is_bounded_at_creation() -> Result<()> {
        let file = ObjectFile::in_memory("nodes");
        file.write(b"one")?;
        let iter = file.all();
        file.write(b"two")?;
        assert_eq!(iter.count(), 1);
        Ok(())
    }

    #[test]
    fn closed_file_rejects_operations() -> Result<()> {
        let file = ObjectFile::in_memory("nodes");
        let off = file.write(b"x")?;
        file.close()?;
        assert!(matches!(file.write(b"y"), Err(TdbError::Closed(_))));
        assert!(matches!(file.read(off), Err(TdbError::Closed(_))));
        Ok(())
    }

    #[test]
    fn torn_tail_surfaces_as_corruption() -> Result<()> {
        let dir = tempdir()?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.path().join("nodes.dat"))?);
        {
            let file = ObjectFile::open(Arc::clone(&io), "nodes.dat")?;
            file.write(b"complete")?;
            file.sync(true)?;
        }
        // A length prefix promising more bytes than follow.
        let end = io.len()?;
        io.write_at(end, &100u32.to_be_bytes())?;
        io.write_at(end + 4, b"short")?;

        let file = ObjectFile::open(io, "nodes.dat")?;
        let entries: Vec<Result<(u64, Vec<u8>)>> = file.all().collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_ok());
        assert!(matches!(entries[1], Err(TdbError::CorruptionAt { offset, .. }) if offset == end));
        file.truncate_to(end)?;
        assert_eq!(file.all().count(), 1);
        Ok(())
    }
}
