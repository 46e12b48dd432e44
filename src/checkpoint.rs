use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::RollupError;
use crate::lock::LockCoordinator;
use crate::types::PathString;

/// Result of a checkpoint commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The entry was appended (and the output published) by this call.
    Recorded,
    /// Another run had already recorded the entry; nothing was published or appended.
    AlreadyRecorded,
}

/// Append-only registry of fully processed input paths, one per line.
///
/// Every mutation happens under the [`LockCoordinator`] lock. Only complete,
/// newline-terminated lines count as entries; a torn tail left by a crash
/// mid-append is ignored on load and cut off before the next append.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: LockCoordinator,
}

impl CheckpointStore {
    /// Registry at `path` guarded by `lock`.
    pub fn new(path: impl Into<PathBuf>, lock: LockCoordinator) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    /// Registry file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every recorded path. A missing registry is empty.
    pub fn load(&self) -> Result<HashSet<PathString>, RollupError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(parse_entries(&bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(err) => Err(RollupError::read(self.path.to_string_lossy(), err)),
        }
    }

    /// Record `entry` without publishing anything alongside it.
    pub fn record(&self, entry: &str) -> Result<CommitOutcome, RollupError> {
        self.commit(entry, || Ok(()))
    }

    /// Publish an output and record `entry` as one critical section.
    ///
    /// Under the lock the registry is re-read; if `entry` is already present
    /// `publish` is not called. Otherwise `publish` runs and, only if it
    /// succeeds, a single complete line is appended and synced.
    pub fn commit<F>(&self, entry: &str, publish: F) -> Result<CommitOutcome, RollupError>
    where
        F: FnOnce() -> Result<(), RollupError>,
    {
        if entry.is_empty() || entry.contains(['\n', '\r']) {
            return Err(RollupError::Checkpoint(format!(
                "entry {entry:?} cannot be stored as a single line"
            )));
        }
        let _guard = self.lock.acquire()?;
        let mut file = self.open_for_append()?;

        let mut existing = Vec::new();
        file.read_to_end(&mut existing)
            .map_err(|err| RollupError::read(self.path.to_string_lossy(), err))?;
        if parse_entries(&existing).contains(entry) {
            debug!(checkpoint = %self.path.display(), entry, "entry already recorded");
            return Ok(CommitOutcome::AlreadyRecorded);
        }
        self.repair_torn_tail(&file, &existing)?;

        publish()?;

        let mut line = String::with_capacity(entry.len() + 1);
        line.push_str(entry);
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|err| RollupError::write(self.path.to_string_lossy(), err))?;
        Ok(CommitOutcome::Recorded)
    }

    fn open_for_append(&self) -> Result<File, RollupError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| RollupError::write(self.path.to_string_lossy(), err))?;
            }
        }
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|err| RollupError::write(self.path.to_string_lossy(), err))
    }

    fn repair_torn_tail(&self, file: &File, existing: &[u8]) -> Result<(), RollupError> {
        if existing.is_empty() || existing.ends_with(b"\n") {
            return Ok(());
        }
        let keep = existing
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |idx| idx + 1);
        warn!(
            checkpoint = %self.path.display(),
            dropped_bytes = existing.len() - keep,
            "truncating torn checkpoint tail"
        );
        file.set_len(keep as u64)
            .and_then(|_| file.sync_data())
            .map_err(|err| RollupError::write(self.path.to_string_lossy(), err))
    }
}

fn parse_entries(bytes: &[u8]) -> HashSet<PathString> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<&str> = text.split('\n').collect();
    // The segment after the last newline is either empty or a torn append.
    lines.pop();
    lines
        .into_iter()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> CheckpointStore {
        CheckpointStore::new(
            dir.join("checkpoint.txt"),
            LockCoordinator::new(dir.join("lockfile.lck"), Some(Duration::from_secs(5))),
        )
    }

    #[test]
    fn missing_registry_loads_empty() {
        let dir = tempdir().unwrap();
        assert!(store_in(dir.path()).load().unwrap().is_empty());
    }

    #[test]
    fn record_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.record("in/com/a.csv").unwrap(), CommitOutcome::Recorded);
        assert_eq!(
            store.record("in/com/a.csv").unwrap(),
            CommitOutcome::AlreadyRecorded
        );
        assert_eq!(store.record("in/net/b.csv").unwrap(), CommitOutcome::Recorded);
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "in/com/a.csv\nin/net/b.csv\n"
        );
        let loaded = store.load().unwrap();
        assert!(loaded.contains("in/com/a.csv"));
        assert!(loaded.contains("in/net/b.csv"));
    }

    #[test]
    fn torn_tail_is_ignored_then_truncated() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(store.path(), "in/com/a.csv\nin/com/b.c").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.contains("in/com/b.c"));

        store.record("in/com/b.csv").unwrap();
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "in/com/a.csv\nin/com/b.csv\n"
        );
    }

    #[test]
    fn failed_publish_appends_nothing() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let result = store.commit("in/com/a.csv", || {
            Err(RollupError::Configuration("publish failed".to_string()))
        });
        assert!(result.is_err());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn publish_is_skipped_for_recorded_entries() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.record("in/com/a.csv").unwrap();
        let mut published = false;
        let outcome = store
            .commit("in/com/a.csv", || {
                published = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, CommitOutcome::AlreadyRecorded);
        assert!(!published);
    }

    #[test]
    fn multiline_entries_are_rejected() {
        let dir = tempdir().unwrap();
        let err = store_in(dir.path()).record("a\nb").unwrap_err();
        assert!(matches!(err, RollupError::Checkpoint(_)));
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(dir.path()));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for idx in 0..25 {
                        store
                            .record(&format!("in/w{worker}/file-{idx:03}.csv"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.ends_with('\n'));
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 100);
        assert!(lines.iter().all(|line| {
            line.starts_with("in/w") && line.ends_with(".csv") && line.matches('/').count() == 2
        }));
        assert_eq!(store.load().unwrap().len(), 100);
    }
}
