use std::io;

use thiserror::Error;

use crate::types::PathString;

/// Error type for shard reads, output publication, and checkpoint coordination.
#[derive(Debug, Error)]
pub enum RollupError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathString,
        #[source]
        source: io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathString,
        #[source]
        source: io::Error,
    },
    #[error("cannot enumerate directory '{path}': {source}")]
    Directory {
        path: PathString,
        #[source]
        source: io::Error,
    },
    #[error("checkpoint lock '{path}' unavailable: {reason}")]
    Lock { path: PathString, reason: String },
    #[error("checkpoint registry failure: {0}")]
    Checkpoint(String),
    #[error("in-flight registry failure: {0}")]
    InFlight(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RollupError {
    pub(crate) fn read(path: impl Into<PathString>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathString>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn directory(path: impl Into<PathString>, source: io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }
}
