#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{FileIo, MemFileIo, StdFileIo};
use crate::types::Result;

/// Where a store keeps its files: a directory, or a named set of in-memory files.
///
/// Clones share the same underlying files, so an in-memory location can be
/// reopened within a process.
#[derive(Clone)]
pub struct Location {
    kind: Arc<Kind>,
}

enum Kind {
    Dir(PathBuf),
    Mem(Mutex<HashMap<String, Arc<MemFileIo>>>),
}

impl Location {
    /// A directory location, created if missing.
    pub fn dir(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        Ok(Self {
            kind: Arc::new(Kind::Dir(path.to_path_buf())),
        })
    }

    /// A fresh in-memory location.
    pub fn mem() -> Self {
        Self {
            kind: Arc::new(Kind::Mem(Mutex::new(HashMap::new()))),
        }
    }

    /// Returns true for in-memory locations.
    pub fn is_mem(&self) -> bool {
        matches!(*self.kind, Kind::Mem(_))
    }

    /// Directory path, for directory locations.
    pub fn path(&self) -> Option<&Path> {
        match &*self.kind {
            Kind::Dir(path) => Some(path),
            Kind::Mem(_) => None,
        }
    }

    /// Full path of a file in a directory location.
    pub fn file_path(&self, name: &str) -> Option<PathBuf> {
        self.path().map(|dir| dir.join(name))
    }

    /// Opens (creating if needed) a file for positioned I/O.
    pub fn open_file(&self, name: &str) -> Result<Arc<dyn FileIo>> {
        match &*self.kind {
            Kind::Dir(dir) => Ok(Arc::new(StdFileIo::open(dir.join(name))?)),
            Kind::Mem(files) => {
                let mut files = files.lock();
                let file = files
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::new(MemFileIo::new()));
                Ok(Arc::clone(file) as Arc<dyn FileIo>)
            }
        }
    }

    /// The named file of an in-memory location, if it has been created.
    pub fn mem_file(&self, name: &str) -> Option<Arc<MemFileIo>> {
        match &*self.kind {
            Kind::Dir(_) => None,
            Kind::Mem(files) => files.lock().get(name).cloned(),
        }
    }

    /// Returns true if the named file exists.
    pub fn exists(&self, name: &str) -> bool {
        match &*self.kind {
            Kind::Dir(dir) => dir.join(name).exists(),
            Kind::Mem(files) => files.lock().contains_key(name),
        }
    }

    /// Reads a whole file, or `None` if it does not exist.
    pub fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match &*self.kind {
            Kind::Dir(dir) => match fs::read(dir.join(name)) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
            Kind::Mem(files) => Ok(files.lock().get(name).map(|file| file.contents())),
        }
    }

    /// Replaces a file's contents so that readers see either the old or the new bytes.
    pub fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        match &*self.kind {
            Kind::Dir(dir) => {
                let target = dir.join(name);
                let tmp = dir.join(format!("{name}.tmp"));
                {
                    let mut file = fs::File::create(&tmp)?;
                    file.write_all(bytes)?;
                    file.sync_all()?;
                }
                fs::rename(&tmp, &target)?;
                trace!(file = name, bytes = bytes.len(), "location.write_atomic");
                Ok(())
            }
            Kind::Mem(files) => {
                let mut files = files.lock();
                let file = files
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::new(MemFileIo::new()));
                file.replace(bytes.to_vec());
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.kind {
            Kind::Dir(dir) => write!(f, "Location({})", dir.display()),
            Kind::Mem(_) => f.write_str("Location(mem)"),
        }
    }
}
