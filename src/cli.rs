use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum, error::ErrorKind};

use crate::config::{ExecutionMode, MergePolicy, RollupConfig, TimestampFormat};
use crate::constants::checkpoint::DEFAULT_LOCK_TIMEOUT;
use crate::constants::inflight::DEFAULT_IN_FLIGHT_TTL;
use crate::constants::reader::{DEFAULT_CHUNK_SIZE, INPUT_EXTENSION};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MergeArg {
    WholeFile,
    FirstBatchWins,
}

impl From<MergeArg> for MergePolicy {
    fn from(value: MergeArg) -> Self {
        match value {
            MergeArg::WholeFile => MergePolicy::WholeFile,
            MergeArg::FirstBatchWins => MergePolicy::FirstBatchWins,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimestampArg {
    Epoch,
    Datetime,
}

impl From<TimestampArg> for TimestampFormat {
    fn from(value: TimestampArg) -> Self {
        match value {
            TimestampArg::Epoch => TimestampFormat::EpochSeconds,
            TimestampArg::Datetime => TimestampFormat::DateTime,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "cname-rollup",
    disable_help_subcommand = true,
    about = "Roll up TLD-sharded cname observations into first/last seen per cname",
    long_about = "Stream every <input>/<shard>/*.csv file in bounded chunks, write <output>/<shard>/<file> as cname;firstseen;lastseen rows, and record finished files in a checkpoint registry so reruns resume where they left off."
)]
struct RollupCli {
    #[arg(value_name = "INPUT_DIR", help = "Root holding one subdirectory per shard")]
    input: PathBuf,
    #[arg(value_name = "OUTPUT_DIR", help = "Root to mirror shard outputs under")]
    output: PathBuf,
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory for checkpoint, lock, and in-flight registry (default: current directory)"
    )]
    state_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Checkpoint registry path override")]
    checkpoint: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Lock file path override")]
    lock_file: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "In-flight registry directory override")]
    in_flight_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help = "Records per batch")]
    chunk_size: usize,
    #[arg(
        long,
        value_enum,
        default_value = "whole-file",
        help = "How spans of keys crossing batches are merged"
    )]
    merge: MergeArg,
    #[arg(long, help = "Process files on this many workers instead of sequentially")]
    workers: Option<usize>,
    #[arg(
        long,
        value_enum,
        default_value = "epoch",
        help = "Rendering of firstseen/lastseen"
    )]
    timestamps: TimestampArg,
    #[arg(
        long,
        default_value_t = DEFAULT_IN_FLIGHT_TTL.as_secs(),
        help = "Seconds without heartbeat after which an in-flight claim expires"
    )]
    in_flight_ttl_secs: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_LOCK_TIMEOUT.as_secs(),
        help = "Seconds to wait for the checkpoint lock (0 waits forever)"
    )]
    lock_timeout_secs: u64,
    #[arg(long, default_value = INPUT_EXTENSION, help = "Input file extension")]
    extension: String,
    #[arg(long, help = "Owner identity recorded in in-flight claims")]
    owner: Option<String>,
}

impl RollupCli {
    fn into_config(self) -> RollupConfig {
        let mut config = RollupConfig::new(self.input, self.output);
        if let Some(dir) = self.state_dir {
            config = config.with_state_dir(dir);
        }
        if let Some(path) = self.checkpoint {
            config = config.with_checkpoint_path(path);
        }
        if let Some(path) = self.lock_file {
            config = config.with_lock_path(path);
        }
        if let Some(dir) = self.in_flight_dir {
            config = config.with_in_flight_dir(dir);
        }
        if let Some(owner) = self.owner {
            config = config.with_owner(owner);
        }
        let execution = match self.workers {
            Some(workers) => ExecutionMode::Parallel { workers },
            None => ExecutionMode::Sequential,
        };
        let lock_timeout =
            (self.lock_timeout_secs > 0).then(|| Duration::from_secs(self.lock_timeout_secs));
        config
            .with_chunk_size(self.chunk_size)
            .with_merge_policy(self.merge.into())
            .with_execution(execution)
            .with_timestamp_format(self.timestamps.into())
            .with_in_flight_ttl(Duration::from_secs(self.in_flight_ttl_secs))
            .with_lock_timeout(lock_timeout)
            .with_file_extension(self.extension)
    }
}

/// Parse `args` (including the program name), run one rollup pass, and return
/// the process exit status.
pub fn run_rollup_cli<I>(args: I) -> Result<u8, Box<dyn Error>>
where
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let Some(cli) = parse_cli::<RollupCli, _>(args)? else {
        return Ok(0);
    };
    let summary = Orchestrator::new(cli.into_config())?.run()?;
    Ok(summary.exit_code())
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
