use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::aggregate::aggregate_file;
use crate::checkpoint::{CheckpointStore, CommitOutcome};
use crate::config::{ExecutionMode, RollupConfig};
use crate::constants::markers::{
    PROCESSED_PREFIX, PROCESSED_SUFFIX, PROCESSING_ERROR, START_PROCESSING,
};
use crate::errors::RollupError;
use crate::inflight::{ClaimHandle, InFlightRegistry};
use crate::lock::LockCoordinator;
use crate::summary::{DirectoryFailure, FileOutcome, FileState, RunSummary};
use crate::transport::fs::ShardTree;
use crate::types::PathString;
use crate::writer::ShardWriter;

/// Walks the shard tree and drives the per-file pipeline:
/// claim → stream/aggregate → stage output → publish + checkpoint (under lock) → release.
pub struct Orchestrator {
    config: RollupConfig,
    checkpoints: CheckpointStore,
    in_flight: InFlightRegistry,
    writer: ShardWriter,
}

struct FileJob {
    input: PathBuf,
    output_dir: PathBuf,
}

impl Orchestrator {
    /// Build an orchestrator from a validated config.
    pub fn new(config: RollupConfig) -> Result<Self, RollupError> {
        config.validate()?;
        let lock = LockCoordinator::new(&config.lock_path, config.lock_timeout);
        let checkpoints = CheckpointStore::new(&config.checkpoint_path, lock);
        let in_flight = InFlightRegistry::new(
            &config.in_flight_dir,
            config.in_flight_ttl,
            config.owner.clone(),
        );
        let writer = ShardWriter::new(config.timestamp_format);
        Ok(Self {
            config,
            checkpoints,
            in_flight,
            writer,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// Checkpoint registry used by this orchestrator.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// In-flight registry used by this orchestrator.
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Process every shard file not yet checkpointed and not claimed elsewhere.
    ///
    /// Returns `Err` only when the run cannot start (output root, checkpoint
    /// registry, in-flight registry, or input root unusable). Per-file and
    /// per-shard failures are reported in the summary.
    pub fn run(&self) -> Result<RunSummary, RollupError> {
        let mut summary = RunSummary::new(Utc::now());
        fs::create_dir_all(&self.config.output_root).map_err(|err| {
            RollupError::directory(self.config.output_root.to_string_lossy(), err)
        })?;
        let done = self.checkpoints.load()?;
        let active = self.in_flight.active()?;
        info!(
            input = %self.config.input_root.display(),
            output = %self.config.output_root.display(),
            checkpointed = done.len(),
            in_flight = active.len(),
            "starting rollup run"
        );

        let shards = ShardTree::new(&self.config.input_root)
            .with_extension(&self.config.file_extension)
            .shards()?;
        let mut jobs = Vec::new();
        for shard in shards {
            let files = match shard.files {
                Ok(files) => files,
                Err(err) => {
                    error!(shard = %shard.path.display(), error = %err, "cannot list shard");
                    summary.directory_failures.push(DirectoryFailure {
                        path: shard.path.to_string_lossy().into_owned(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let output_dir = self.config.output_root.join(&shard.name);
            if let Err(err) = fs::create_dir_all(&output_dir) {
                error!(shard = %output_dir.display(), error = %err, "cannot mirror shard");
                summary.directory_failures.push(DirectoryFailure {
                    path: output_dir.to_string_lossy().into_owned(),
                    error: err.to_string(),
                });
                continue;
            }
            summary.discovered += files.len();
            for input in files {
                let entry = checkpoint_entry(&input);
                if done.contains(&entry) {
                    summary.skipped_checkpointed += 1;
                } else if active.contains(&entry) {
                    info!(file = %entry, "skipping file claimed by a live run");
                    summary.skipped_in_flight += 1;
                } else {
                    jobs.push(FileJob {
                        input,
                        output_dir: output_dir.clone(),
                    });
                }
            }
        }

        summary.outcomes = self.execute(&jobs)?;
        summary.finished_at = Utc::now();
        if summary.is_success() {
            info!(summary = %summary, "rollup run finished");
        } else {
            error!(
                summary = %summary,
                failed = ?summary.failed(),
                "rollup run finished with failures"
            );
        }
        Ok(summary)
    }

    /// Run the per-file pipeline on `input`, writing into `output_dir`.
    ///
    /// Does not consult the loaded checkpoint set; a file recorded by another
    /// run in the meantime is detected under the lock and left untouched.
    pub fn process_file(&self, input: &Path, output_dir: &Path) -> FileOutcome {
        let entry = checkpoint_entry(input);
        let mut claim = match self.in_flight.claim(&entry) {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                info!(file = %entry, "skipping file claimed by a live run");
                return FileOutcome::ClaimedElsewhere { path: entry };
            }
            Err(err) => return self.failed(entry, FileState::NotStarted, &err),
        };

        // Another run may have finished the file since this run loaded the registry.
        match self.checkpoints.load() {
            Ok(done) if done.contains(&entry) => {
                info!(file = %entry, "already checkpointed by another run; skipping");
                return FileOutcome::AlreadyCheckpointed { path: entry };
            }
            Ok(_) => {}
            Err(err) => return self.failed(entry, FileState::NotStarted, &err),
        }

        info!(file = %entry, owner = %claim.claim().owner, "{START_PROCESSING} {entry}");
        let mut state = FileState::InProgress;
        let result = self.pipeline(input, output_dir, &entry, &mut claim, &mut state);
        if let Err(err) = claim.release() {
            warn!(file = %entry, error = %err, "failed to release claim");
        }

        match result {
            Ok(outcome) => outcome,
            Err(err) => self.failed(entry, state, &err),
        }
    }

    fn pipeline(
        &self,
        input: &Path,
        output_dir: &Path,
        entry: &str,
        claim: &mut ClaimHandle,
        state: &mut FileState,
    ) -> Result<FileOutcome, RollupError> {
        let aggregate = aggregate_file(
            input,
            self.config.chunk_size,
            self.config.merge_policy,
            |_| claim.heartbeat(),
        )?;
        let staged = self.writer.stage(input, output_dir, &aggregate)?;
        let destination = staged.destination().to_path_buf();

        let committed = self.checkpoints.commit(entry, || {
            staged.publish()?;
            *state = FileState::OutputWritten;
            Ok(())
        })?;

        match committed {
            CommitOutcome::Recorded => {
                *state = FileState::Checkpointed;
                info!(
                    file = %entry,
                    output = %destination.display(),
                    keys = aggregate.len(),
                    records = aggregate.records,
                    batches = aggregate.batches,
                    undefined_times = aggregate.undefined_times,
                    "{PROCESSED_PREFIX} {entry} {PROCESSED_SUFFIX}"
                );
                Ok(FileOutcome::Checkpointed {
                    path: entry.to_string(),
                    keys: aggregate.len(),
                    records: aggregate.records,
                })
            }
            CommitOutcome::AlreadyRecorded => {
                info!(file = %entry, "already checkpointed by another run; discarding output");
                Ok(FileOutcome::AlreadyCheckpointed {
                    path: entry.to_string(),
                })
            }
        }
    }

    fn execute(&self, jobs: &[FileJob]) -> Result<Vec<FileOutcome>, RollupError> {
        match self.config.execution {
            ExecutionMode::Sequential => Ok(jobs
                .iter()
                .map(|job| self.process_file(&job.input, &job.output_dir))
                .collect()),
            ExecutionMode::Parallel { workers } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|idx| format!("rollup-worker-{idx}"))
                    .build()
                    .map_err(|err| RollupError::Configuration(err.to_string()))?;
                Ok(pool.install(|| {
                    jobs.par_iter()
                        .map(|job| self.process_file(&job.input, &job.output_dir))
                        .collect()
                }))
            }
        }
    }

    fn failed(&self, entry: PathString, during: FileState, err: &RollupError) -> FileOutcome {
        error!(
            file = %entry,
            during = %during,
            error = %err,
            "{PROCESSING_ERROR} {entry}: {err}"
        );
        FileOutcome::Failed {
            path: entry,
            during,
            error: err.to_string(),
        }
    }
}

/// Path spelling recorded in (and matched against) the checkpoint registry.
pub fn checkpoint_entry(input: &Path) -> PathString {
    input.to_string_lossy().into_owned()
}
