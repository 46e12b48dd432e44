#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Per-batch grouping and file-level folding of cname spans.
pub mod aggregate;
/// Append-only checkpoint registry of finished input files.
pub mod checkpoint;
/// Command-line entry point.
pub mod cli;
/// Rollup configuration types.
pub mod config;
/// Centralized constants used across reader, writer, and coordination code.
pub mod constants;
/// Observation and aggregate types.
pub mod data;
mod hash;
/// In-flight claim registry shared by concurrent runs.
pub mod inflight;
/// Advisory file lock around checkpoint updates.
pub mod lock;
/// Shard-tree walk and per-file pipeline driver.
pub mod orchestrator;
/// Chunked CSV input reader.
pub mod reader;
/// Per-file and per-run outcome reporting.
pub mod summary;
/// Input transports (filesystem shard trees).
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Staged, atomically published shard output.
pub mod writer;

mod errors;

pub use aggregate::{Aggregator, aggregate_file, summarize_batch};
pub use checkpoint::{CheckpointStore, CommitOutcome};
pub use config::{ExecutionMode, MergePolicy, RollupConfig, TimestampFormat};
pub use data::{FileAggregate, KeySpan, Observation};
pub use errors::RollupError;
pub use inflight::{ClaimHandle, InFlightClaim, InFlightRegistry};
pub use lock::{LockCoordinator, LockGuard};
pub use orchestrator::{Orchestrator, checkpoint_entry};
pub use reader::ChunkReader;
pub use summary::{DirectoryFailure, FileOutcome, FileState, RunSummary};
pub use transport::fs::{ShardListing, ShardTree};
pub use types::{Cname, EpochSeconds, OwnerId, PathString, ShardName};
pub use writer::{ShardWriter, StagedOutput};
