use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::constants::checkpoint::{
    DEFAULT_CHECKPOINT_FILENAME, DEFAULT_LOCK_FILENAME, DEFAULT_LOCK_TIMEOUT,
};
use crate::constants::inflight::{DEFAULT_IN_FLIGHT_DIRNAME, DEFAULT_IN_FLIGHT_TTL};
use crate::constants::reader::{DEFAULT_CHUNK_SIZE, INPUT_EXTENSION};
use crate::errors::RollupError;
use crate::types::OwnerId;

/// How per-batch aggregates are folded into the file-level table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Merge every batch into a running per-key min/max.
    ///
    /// The result equals the true whole-file first/last seen and does not depend
    /// on the chunk size.
    #[default]
    WholeFile,
    /// Keep only the aggregate from the batch in which a key first appears.
    ///
    /// Later batches never widen a key's span, so results change with the chunk
    /// size. Retained to reproduce outputs of the legacy pipeline.
    FirstBatchWins,
}

/// How pending shard files are scheduled within one orchestrator run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One file at a time, in enumeration order.
    #[default]
    Sequential,
    /// A bounded worker pool across files; each file is still streamed in chunks.
    Parallel {
        /// Number of worker threads.
        workers: usize,
    },
}

/// Rendering of `firstseen` / `lastseen` in output rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Raw epoch seconds, e.g. `a;50;100`.
    #[default]
    EpochSeconds,
    /// UTC calendar time, e.g. `a;1970-01-01 00:00:50;1970-01-01 00:01:40`.
    DateTime,
}

/// Top-level rollup configuration.
#[derive(Clone, Debug)]
pub struct RollupConfig {
    /// Root holding one subdirectory per shard.
    pub input_root: PathBuf,
    /// Root under which shard subdirectories are mirrored for output.
    pub output_root: PathBuf,
    /// Append-only registry of fully processed input paths.
    pub checkpoint_path: PathBuf,
    /// Zero-content file locked around checkpoint appends.
    pub lock_path: PathBuf,
    /// Directory holding in-flight claim documents.
    pub in_flight_dir: PathBuf,
    /// Extension (without dot) of input files inside shards.
    pub file_extension: String,
    /// Records per batch.
    pub chunk_size: usize,
    /// Cross-batch merge behavior.
    pub merge_policy: MergePolicy,
    /// File scheduling mode.
    pub execution: ExecutionMode,
    /// Timestamp rendering in output rows.
    pub timestamp_format: TimestampFormat,
    /// Age after which an un-heartbeaten claim is considered abandoned.
    pub in_flight_ttl: Duration,
    /// Max wait for the checkpoint lock; `None` blocks indefinitely.
    pub lock_timeout: Option<Duration>,
    /// Identity recorded in claims made by this instance.
    pub owner: OwnerId,
}

impl RollupConfig {
    /// Create a config for `input_root` → `output_root` with default coordination files
    /// in the current directory.
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_FILENAME),
            lock_path: PathBuf::from(DEFAULT_LOCK_FILENAME),
            in_flight_dir: PathBuf::from(DEFAULT_IN_FLIGHT_DIRNAME),
            file_extension: INPUT_EXTENSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            merge_policy: MergePolicy::default(),
            execution: ExecutionMode::default(),
            timestamp_format: TimestampFormat::default(),
            in_flight_ttl: DEFAULT_IN_FLIGHT_TTL,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            owner: default_owner(),
        }
    }

    /// Place checkpoint, lock, and in-flight registry under `dir` using default names.
    pub fn with_state_dir(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            checkpoint_path: dir.join(DEFAULT_CHECKPOINT_FILENAME),
            lock_path: dir.join(DEFAULT_LOCK_FILENAME),
            in_flight_dir: dir.join(DEFAULT_IN_FLIGHT_DIRNAME),
            ..self
        }
    }

    /// Override the checkpoint registry path.
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    /// Override the lock file path.
    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = path.into();
        self
    }

    /// Override the in-flight registry directory.
    pub fn with_in_flight_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.in_flight_dir = dir.into();
        self
    }

    /// Override the records-per-batch chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Override the cross-batch merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Override the execution mode.
    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Override output timestamp rendering.
    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    /// Override the in-flight claim TTL.
    pub fn with_in_flight_ttl(mut self, ttl: Duration) -> Self {
        self.in_flight_ttl = ttl;
        self
    }

    /// Override the checkpoint lock timeout (`None` waits forever).
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Override the claim owner identity.
    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Override the input file extension.
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), RollupError> {
        if self.chunk_size == 0 {
            return Err(RollupError::Configuration(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if let ExecutionMode::Parallel { workers: 0 } = self.execution {
            return Err(RollupError::Configuration(
                "parallel execution needs at least 1 worker".to_string(),
            ));
        }
        if self.in_flight_ttl.is_zero() {
            return Err(RollupError::Configuration(
                "in-flight ttl must be non-zero".to_string(),
            ));
        }
        if self.owner.trim().is_empty() {
            return Err(RollupError::Configuration(
                "owner identity must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Owner identity derived from host, process id, and start time.
pub fn default_owner() -> OwnerId {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{host}-pid{}-{nanos}", std::process::id())
}
