#![allow(unsafe_code)]
//! Single-writer coordination for a store location.
//!
//! Within a process, write permits are handed out one at a time through a
//! mutex and condvar. Across processes, the owning process holds an exclusive
//! byte-range lock on the location's lock file for as long as the store is
//! open.
//!
//! [`ExclusiveGate`] counts running transactions so that one caller can wait
//! for all of them to finish and keep new ones out.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::types::{Result, TdbError};

const OWNER_SLOT_START: u64 = 0;
const OWNER_SLOT_LEN: u64 = 1;

/// Hands out at most one write permit at a time.
#[derive(Clone)]
pub struct WriterGate {
    inner: Arc<Inner>,
}

struct Inner {
    owner_lock: Option<Arc<File>>,
    state: Mutex<GateState>,
    released: Condvar,
}

#[derive(Default, Debug)]
struct GateState {
    writer: bool,
    waiting: u32,
    granted: u64,
}

/// Snapshot of gate state for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct GateSnapshot {
    /// Whether a write permit is outstanding.
    pub writer: bool,
    /// Threads blocked waiting for the permit.
    pub waiting: u32,
    /// Permits granted since the gate was created.
    pub granted: u64,
}

/// Proof of write exclusivity; released on drop.
pub struct WriterPermit {
    inner: Arc<Inner>,
}

impl Drop for WriterPermit {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.writer = false;
        trace!(waiting = state.waiting, "writer_gate.release");
        drop(state);
        self.inner.released.notify_one();
    }
}

impl WriterGate {
    /// A gate with no cross-process lock, for in-memory stores.
    pub fn in_process() -> Self {
        Self::with_lock(None)
    }

    /// Opens the lock file at `path` and takes ownership of the location.
    ///
    /// Fails if another process already owns it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < OWNER_SLOT_LEN {
            file.set_len(OWNER_SLOT_LEN)?;
        }
        if !lock_region(&file, OWNER_SLOT_START, OWNER_SLOT_LEN, true, false)? {
            return Err(TdbError::InvalidOwned(format!(
                "{} is locked by another process",
                path.display()
            )));
        }
        debug!(path = %path.display(), "writer_gate.open");
        Ok(Self::with_lock(Some(Arc::new(file))))
    }

    fn with_lock(owner_lock: Option<Arc<File>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                owner_lock,
                state: Mutex::new(GateState::default()),
                released: Condvar::new(),
            }),
        }
    }

    /// Blocks until the write permit is free, then takes it.
    pub fn acquire(&self) -> WriterPermit {
        let mut state = self.inner.state.lock();
        state.waiting += 1;
        while state.writer {
            self.inner.released.wait(&mut state);
        }
        state.waiting -= 1;
        state.writer = true;
        state.granted += 1;
        trace!(granted = state.granted, "writer_gate.acquire");
        WriterPermit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Takes the write permit if it is free.
    pub fn try_acquire(&self) -> Option<WriterPermit> {
        let mut state = self.inner.state.lock();
        if state.writer {
            return None;
        }
        state.writer = true;
        state.granted += 1;
        Some(WriterPermit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns a snapshot of the current gate state.
    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.inner.state.lock();
        GateSnapshot {
            writer: state.writer,
            waiting: state.waiting,
            granted: state.granted,
        }
    }
}

/// Lets transactions in while no exclusive hold is taken.
#[derive(Clone, Default)]
pub struct ExclusiveGate {
    inner: Arc<ExclusiveInner>,
}

#[derive(Default)]
struct ExclusiveInner {
    state: Mutex<ExclusiveState>,
    changed: Condvar,
}

#[derive(Default, Debug)]
struct ExclusiveState {
    running: u64,
    exclusive: bool,
}

/// Held by a running transaction; released on drop.
pub struct TxnHold {
    inner: Arc<ExclusiveInner>,
}

impl Drop for TxnHold {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.running -= 1;
        let idle = state.running == 0;
        drop(state);
        if idle {
            self.inner.changed.notify_all();
        }
    }
}

/// Sole access; released on drop.
pub struct ExclusiveHold {
    inner: Arc<ExclusiveInner>,
}

impl Drop for ExclusiveHold {
    fn drop(&mut self) {
        self.inner.state.lock().exclusive = false;
        trace!("exclusive_gate.release");
        self.inner.changed.notify_all();
    }
}

impl ExclusiveGate {
    /// Registers a transaction, waiting while an exclusive hold is taken or
    /// requested.
    pub fn enter(&self) -> TxnHold {
        let mut state = self.inner.state.lock();
        while state.exclusive {
            self.inner.changed.wait(&mut state);
        }
        state.running += 1;
        TxnHold {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Registers a transaction unless an exclusive hold is taken or requested.
    pub fn try_enter(&self) -> Option<TxnHold> {
        let mut state = self.inner.state.lock();
        if state.exclusive {
            return None;
        }
        state.running += 1;
        Some(TxnHold {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Stops new transactions from entering, then waits for the running ones.
    ///
    /// Deadlocks if the calling thread holds a [`TxnHold`].
    pub fn exclusive(&self) -> ExclusiveHold {
        let mut state = self.inner.state.lock();
        while state.exclusive {
            self.inner.changed.wait(&mut state);
        }
        state.exclusive = true;
        while state.running > 0 {
            self.inner.changed.wait(&mut state);
        }
        trace!("exclusive_gate.acquire");
        ExclusiveHold {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Takes sole access only if nothing is running.
    pub fn try_exclusive(&self) -> Option<ExclusiveHold> {
        let mut state = self.inner.state.lock();
        if state.exclusive || state.running > 0 {
            return None;
        }
        state.exclusive = true;
        Some(ExclusiveHold {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Transactions currently registered.
    pub fn running(&self) -> u64 {
        self.inner.state.lock().running
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(file) = self.owner_lock.take() {
            if let Err(err) = unlock_region(&file, OWNER_SLOT_START, OWNER_SLOT_LEN) {
                warn!(error = %err, "writer_gate.unlock_failed");
            }
        }
    }
}

fn lock_region(file: &File, start: u64, len: u64, exclusive: bool, blocking: bool) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_region(file, start, len, exclusive, blocking)
    }
    #[cfg(windows)]
    {
        windows::lock_region(file, start, len, exclusive, blocking)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len, exclusive, blocking);
        Ok(true)
    }
}

fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock_region(file, start, len)
    }
    #[cfg(windows)]
    {
        windows::unlock_region(file, start, len)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len);
        Ok(())
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn flock(l_type: libc::c_short, start: u64, len: u64) -> libc::flock {
        // SAFETY: flock is a plain C struct; all-zero is a valid value on every unix target.
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = l_type;
        lock.l_whence = libc::SEEK_SET as _;
        lock.l_start = start as libc::off_t;
        lock.l_len = len as libc::off_t;
        lock
    }

    pub fn lock_region(
        file: &File,
        start: u64,
        len: u64,
        exclusive: bool,
        blocking: bool,
    ) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        let l_type = if exclusive { libc::F_WRLCK } else { libc::F_RDLCK };
        let mut lock = flock(l_type as libc::c_short, start, len);
        let cmd = if blocking { libc::F_SETLKW } else { libc::F_SETLK };
        loop {
            // SAFETY: fd is a valid open descriptor and lock outlives the call.
            let res = unsafe { libc::fcntl(fd, cmd, &mut lock) };
            if res == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) if blocking => continue,
                Some(libc::EAGAIN) | Some(libc::EACCES) if !blocking => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        let mut lock = flock(libc::F_UNLCK as libc::c_short, start, len);
        // SAFETY: fd is a valid open descriptor and lock outlives the call.
        let res = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut lock) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn lock_region(
        file: &File,
        start: u64,
        len: u64,
        exclusive: bool,
        blocking: bool,
    ) -> io::Result<bool> {
        let mut flags = 0;
        if exclusive {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        if !blocking {
            flags |= LOCKFILE_FAIL_IMMEDIATELY;
        }
        // SAFETY: the handle is owned by `file`; OVERLAPPED is zero-initialised as the API expects.
        unsafe {
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = start as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
            let res = LockFileEx(
                file.as_raw_handle() as isize,
                flags,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                return Ok(true);
            }
        }
        let err = io::Error::last_os_error();
        if !blocking && matches!(err.raw_os_error(), Some(code) if code as u32 == ERROR_LOCK_VIOLATION) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        // SAFETY: see lock_region.
        unsafe {
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = start as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
            let res = UnlockFileEx(
                file.as_raw_handle() as isize,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }
}
