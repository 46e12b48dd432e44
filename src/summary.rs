use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::PathString;

/// Lifecycle of one input file within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    /// Not yet picked up (also the state of a failed file on the next run).
    NotStarted,
    /// Claimed and being streamed/aggregated/staged.
    InProgress,
    /// Output renamed into place; checkpoint append pending.
    OutputWritten,
    /// Recorded in the checkpoint registry. Terminal.
    Checkpointed,
    /// Aborted; nothing was recorded.
    Failed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileState::NotStarted => "not-started",
            FileState::InProgress => "in-progress",
            FileState::OutputWritten => "output-written",
            FileState::Checkpointed => "checkpointed",
            FileState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What happened to one file handed to the per-file pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOutcome {
    /// Output published and checkpoint appended.
    Checkpointed {
        /// Input path.
        path: PathString,
        /// Distinct keys written.
        keys: usize,
        /// Rows read.
        records: usize,
    },
    /// Another run recorded the file first; our output was discarded.
    AlreadyCheckpointed {
        /// Input path.
        path: PathString,
    },
    /// Another owner holds a live claim on the file.
    ClaimedElsewhere {
        /// Input path.
        path: PathString,
    },
    /// Processing aborted.
    Failed {
        /// Input path.
        path: PathString,
        /// Last state reached before failing.
        during: FileState,
        /// Rendered error.
        error: String,
    },
}

/// A shard directory that could not be listed or mirrored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryFailure {
    /// Directory path.
    pub path: PathString,
    /// Rendered error.
    pub error: String,
}

/// End-of-run report.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
    /// Files found across all listable shards.
    pub discovered: usize,
    /// Files skipped because the loaded checkpoint set already had them.
    pub skipped_checkpointed: usize,
    /// Files skipped because a live in-flight claim existed at run start.
    pub skipped_in_flight: usize,
    /// Per-file outcomes for every file the pipeline was run on, in enumeration order.
    pub outcomes: Vec<FileOutcome>,
    /// Shards that could not be listed or mirrored.
    pub directory_failures: Vec<DirectoryFailure>,
}

impl RunSummary {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            discovered: 0,
            skipped_checkpointed: 0,
            skipped_in_flight: 0,
            outcomes: Vec::new(),
            directory_failures: Vec::new(),
        }
    }

    /// Files checkpointed by this run.
    pub fn processed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                FileOutcome::Checkpointed { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Files that failed in this run.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                FileOutcome::Failed { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Count of outcomes matching `pred`.
    pub fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| pred(outcome)).count()
    }

    /// True when no file failed and every shard was listed and mirrored.
    pub fn is_success(&self) -> bool {
        self.directory_failures.is_empty()
            && !self
                .outcomes
                .iter()
                .any(|outcome| matches!(outcome, FileOutcome::Failed { .. }))
    }

    /// Process exit status: 0 on success, 2 when only files failed, 3 on directory failures.
    pub fn exit_code(&self) -> u8 {
        if !self.directory_failures.is_empty() {
            3
        } else if !self.is_success() {
            2
        } else {
            0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "discovered={} checkpointed={} already_checkpointed={} claimed_elsewhere={} failed={} skipped_checkpointed={} skipped_in_flight={} directory_failures={} elapsed_ms={}",
            self.discovered,
            self.count(|o| matches!(o, FileOutcome::Checkpointed { .. })),
            self.count(|o| matches!(o, FileOutcome::AlreadyCheckpointed { .. })),
            self.count(|o| matches!(o, FileOutcome::ClaimedElsewhere { .. })),
            self.count(|o| matches!(o, FileOutcome::Failed { .. })),
            self.skipped_checkpointed,
            self.skipped_in_flight,
            self.directory_failures.len(),
            (self.finished_at - self.started_at).num_milliseconds()
        )
    }
}
