/// Constants used by chunked reading and aggregation.
pub mod reader {
    /// Records per batch when no chunk size is configured.
    pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
    /// Column separator of the input CSV rows.
    pub const INPUT_DELIMITER: char = ',';
    /// Quote character stripped from either end of an input field.
    pub const INPUT_QUOTE: char = '"';
    /// Extension (without dot) of input files picked up inside a shard.
    pub const INPUT_EXTENSION: &str = "csv";
}

/// Constants used by the shard output writer.
pub mod writer {
    /// Field separator of output rows (`cname;firstseen;lastseen`).
    pub const OUTPUT_DELIMITER: char = ';';
    /// `chrono` format used by `TimestampFormat::DateTime`.
    pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    /// Prefix of staged output files before they are renamed into place.
    pub const STAGING_PREFIX: &str = ".staging-";
}

/// Constants used by the checkpoint registry and its lock.
pub mod checkpoint {
    use std::time::Duration;

    /// Default checkpoint registry filename.
    pub const DEFAULT_CHECKPOINT_FILENAME: &str = "checkpoint.txt";
    /// Default lock filename guarding checkpoint appends.
    pub const DEFAULT_LOCK_FILENAME: &str = "lockfile.lck";
    /// Default upper bound on waiting for the checkpoint lock.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
    /// Poll interval used while waiting on a contended lock with a deadline.
    pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);
}

/// Constants used by the in-flight claim registry.
pub mod inflight {
    use std::time::Duration;

    /// Default in-flight registry directory name.
    pub const DEFAULT_IN_FLIGHT_DIRNAME: &str = ".in_flight";
    /// Claims whose heartbeat is older than this are treated as abandoned.
    pub const DEFAULT_IN_FLIGHT_TTL: Duration = Duration::from_secs(15 * 60);
    /// Heartbeats are written at most once per `ttl / HEARTBEAT_DIVISOR`.
    pub const HEARTBEAT_DIVISOR: u32 = 4;
    /// Extension of claim documents.
    pub const CLAIM_EXTENSION: &str = "json";
    /// Seed mixed into claim filename hashing.
    pub const CLAIM_HASH_SEED: u64 = 0xC1A1_5EED;
    /// Infix used when an expired claim is moved aside before takeover.
    pub const EXPIRED_INFIX: &str = "expired";
}

/// Fixed log markers emitted around per-file processing.
pub mod markers {
    /// Emitted when a file enters `InProgress`.
    pub const START_PROCESSING: &str = "Starting to process file:";
    /// Emitted (with `PROCESSED_SUFFIX`) when a file reaches `Checkpointed`.
    pub const PROCESSED_PREFIX: &str = "Processed file";
    /// Trailer of the checkpointed marker.
    pub const PROCESSED_SUFFIX: &str = "successfully.";
    /// Emitted when a file ends in `Failed`.
    pub const PROCESSING_ERROR: &str = "Error processing file";
}
