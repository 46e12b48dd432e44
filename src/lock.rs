use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::constants::checkpoint::LOCK_POLL_INTERVAL;
use crate::errors::RollupError;

/// Exclusive OS-level advisory lock on a zero-content marker file.
#[derive(Clone, Debug)]
pub struct LockCoordinator {
    path: PathBuf,
    timeout: Option<Duration>,
}

/// Held lock; dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockCoordinator {
    /// Coordinate on `path`, waiting at most `timeout` (`None` blocks indefinitely).
    pub fn new(path: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive lock.
    pub fn acquire(&self) -> Result<LockGuard, RollupError> {
        let file = self.open_lock_file()?;
        match self.timeout {
            None => FileExt::lock_exclusive(&file).map_err(|err| self.lock_err(err.to_string()))?,
            Some(timeout) => self.lock_with_deadline(&file, timeout)?,
        }
        debug!(lock = %self.path.display(), "acquired checkpoint lock");
        Ok(LockGuard {
            file,
            path: self.path.clone(),
        })
    }

    fn lock_with_deadline(&self, file: &File, timeout: Duration) -> Result<(), RollupError> {
        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(file) {
                Ok(()) => return Ok(()),
                Err(err) if is_contended(&err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.lock_err(format!(
                            "still held by another process after {timeout:?}"
                        )));
                    }
                    thread::sleep(LOCK_POLL_INTERVAL.min(deadline - now));
                }
                Err(err) => return Err(self.lock_err(err.to_string())),
            }
        }
    }

    fn open_lock_file(&self) -> Result<File, RollupError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.lock_err(err.to_string()))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|err| self.lock_err(err.to_string()))
    }

    fn lock_err(&self, reason: String) -> RollupError {
        RollupError::Lock {
            path: self.path.to_string_lossy().into_owned(),
            reason,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %err, "failed to release checkpoint lock");
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind() || err.kind() == io::ErrorKind::WouldBlock
}
