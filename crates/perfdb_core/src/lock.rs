//! Inter-process storage lock.
//!
//! Multi-step controller operations hold an advisory lock on
//! `<root>/.lock` from before the storage transaction begins until after it
//! commits or rolls back, so two CLI invocations against the same storage
//! root never interleave a partial propagation.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock file name within the storage root.
pub const LOCK_FILE: &str = ".lock";

/// Delay between attempts when acquiring with a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct LockState {
    file: Option<File>,
    owner: Option<ThreadId>,
    depth: usize,
}

/// Advisory file lock scoped to a storage root.
///
/// The lock is re-entrant for the thread holding it: nested acquisitions
/// only bump a counter, and the file lock is released when the outermost
/// [`LockGuard`] drops. Other threads sharing the same `ProcessLock` wait
/// for that release just as other processes do, honoring the same timeout.
///
/// # Example
///
/// ```rust
/// use perfdb_core::ProcessLock;
///
/// let dir = tempfile::tempdir().unwrap();
/// let lock = ProcessLock::new(dir.path(), None);
/// {
///     let _outer = lock.acquire().unwrap();
///     let _inner = lock.acquire().unwrap();
///     assert_eq!(lock.depth(), 2);
/// }
/// assert!(!lock.is_held());
/// ```
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    timeout: Option<Duration>,
    state: Mutex<LockState>,
    released: Condvar,
}

impl ProcessLock {
    /// Creates a lock for the storage root `root`. Nothing is opened yet.
    ///
    /// With `timeout == None` acquisition blocks until the lock is free.
    #[must_use]
    pub fn new(root: &Path, timeout: Option<Duration>) -> Self {
        Self {
            path: root.join(LOCK_FILE),
            timeout,
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if some thread of this process holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Returns the current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    /// Acquires the lock, or re-enters it if this thread already holds it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if a timeout is configured and
    /// another thread or process holds the lock for longer, or an I/O error
    /// if the lock file cannot be opened.
    pub fn acquire(&self) -> CoreResult<LockGuard<'_>> {
        let me = thread::current().id();
        let start = Instant::now();
        let mut state = self.state.lock();
        while state.depth > 0 && state.owner != Some(me) {
            match self.timeout {
                None => self.released.wait(&mut state),
                Some(timeout) => {
                    let timed_out = self
                        .released
                        .wait_until(&mut state, start + timeout)
                        .timed_out();
                    if timed_out && state.depth > 0 {
                        return Err(self.timed_out(start));
                    }
                }
            }
        }
        if state.depth > 0 {
            state.depth += 1;
            return Ok(LockGuard { lock: self });
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        match self.timeout {
            None => file.lock_exclusive()?,
            Some(timeout) => {
                while file.try_lock_exclusive().is_err() {
                    if start.elapsed() >= timeout {
                        return Err(self.timed_out(start));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }

        debug!(path = %self.path.display(), "storage lock acquired");
        state.file = Some(file);
        state.owner = Some(me);
        state.depth = 1;
        Ok(LockGuard { lock: self })
    }

    fn timed_out(&self, start: Instant) -> CoreError {
        CoreError::LockTimeout {
            path: self.path.clone(),
            waited: start.elapsed(),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        state.owner = None;
        if let Some(file) = state.file.take() {
            if let Err(err) = FileExt::unlock(&file) {
                warn!(path = %self.path.display(), %err, "failed to unlock storage lock");
            }
            debug!(path = %self.path.display(), "storage lock released");
        }
        self.released.notify_one();
    }
}

/// Holds one level of a [`ProcessLock`]; releases it on drop.
#[derive(Debug)]
#[must_use = "the lock is released when the guard drops"]
pub struct LockGuard<'a> {
    lock: &'a ProcessLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reentrant_and_released() {
        let dir = tempdir().unwrap();
        let lock = ProcessLock::new(dir.path(), None);
        assert!(!lock.is_held());

        let outer = lock.acquire().unwrap();
        let inner = lock.acquire().unwrap();
        assert_eq!(lock.depth(), 2);
        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempdir().unwrap();
        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.path().join(LOCK_FILE))
            .unwrap();
        holder.lock_exclusive().unwrap();

        let lock = ProcessLock::new(dir.path(), Some(Duration::from_millis(100)));
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert!(!lock.is_held());

        FileExt::unlock(&holder).unwrap();
        let _guard = lock.acquire().unwrap();
        assert!(lock.is_held());
    }

    #[test]
    fn other_threads_do_not_reenter() {
        let dir = tempdir().unwrap();
        let lock = ProcessLock::new(dir.path(), Some(Duration::from_millis(100)));
        let guard = lock.acquire().unwrap();

        thread::scope(|s| {
            let err = s
                .spawn(|| lock.acquire().map(|_| ()).unwrap_err())
                .join()
                .unwrap();
            assert!(matches!(err, CoreError::LockTimeout { .. }));
        });
        assert_eq!(lock.depth(), 1);

        drop(guard);
        thread::scope(|s| {
            s.spawn(|| {
                let _guard = lock.acquire().unwrap();
                assert_eq!(lock.depth(), 1);
            });
        });
        assert!(!lock.is_held());
    }

    #[test]
    fn waiting_thread_takes_over_on_release() {
        let dir = tempdir().unwrap();
        let lock = ProcessLock::new(dir.path(), None);
        let guard = lock.acquire().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        thread::scope(|s| {
            let lock = &lock;
            s.spawn(move || {
                let _guard = lock.acquire().unwrap();
                tx.send(lock.depth()).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(guard);
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        });
    }

    #[test]
    fn creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("store");
        let lock = ProcessLock::new(&root, None);
        let _guard = lock.acquire().unwrap();
        assert!(root.join(LOCK_FILE).exists());
    }
}
