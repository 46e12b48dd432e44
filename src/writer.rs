use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tempfile::NamedTempFile;

use crate::config::TimestampFormat;
use crate::constants::writer::{DATETIME_FORMAT, OUTPUT_DELIMITER, STAGING_PREFIX};
use crate::data::{FileAggregate, KeySpan};
use crate::errors::RollupError;
use crate::types::EpochSeconds;

/// Serializes per-file aggregates to `output_dir/basename(input)`.
///
/// Output is first staged next to its destination and only becomes visible
/// through an atomic rename, so readers never observe a partially written file
/// and concurrent writers of the same shard file cannot interleave.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShardWriter {
    format: TimestampFormat,
}

/// Fully written, fsynced output waiting to be renamed into place.
///
/// Dropping it without publishing discards the staged file.
#[derive(Debug)]
pub struct StagedOutput {
    temp: NamedTempFile,
    destination: PathBuf,
    keys: usize,
}

impl ShardWriter {
    /// Create a writer rendering timestamps with `format`.
    pub fn new(format: TimestampFormat) -> Self {
        Self { format }
    }

    /// Destination of the output produced for `input_path`.
    pub fn output_path(output_dir: &Path, input_path: &Path) -> Result<PathBuf, RollupError> {
        let name = input_path.file_name().ok_or_else(|| {
            RollupError::Configuration(format!(
                "input path '{}' has no file name",
                input_path.display()
            ))
        })?;
        Ok(output_dir.join(name))
    }

    /// Write `aggregate` to a staging file in `output_dir`.
    pub fn stage(
        &self,
        input_path: &Path,
        output_dir: &Path,
        aggregate: &FileAggregate,
    ) -> Result<StagedOutput, RollupError> {
        let destination = Self::output_path(output_dir, input_path)?;
        let write_err = |err| RollupError::write(destination.to_string_lossy(), err);

        let mut temp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(output_dir)
            .map_err(write_err)?;
        {
            let mut out = BufWriter::new(temp.as_file_mut());
            for (cname, span) in aggregate.iter() {
                writeln!(out, "{}", render_line(cname, span, self.format)).map_err(write_err)?;
            }
            out.flush().map_err(write_err)?;
        }
        temp.as_file().sync_all().map_err(write_err)?;

        Ok(StagedOutput {
            temp,
            destination,
            keys: aggregate.len(),
        })
    }

    /// Stage and immediately publish `aggregate`.
    pub fn write(
        &self,
        input_path: &Path,
        output_dir: &Path,
        aggregate: &FileAggregate,
    ) -> Result<PathBuf, RollupError> {
        self.stage(input_path, output_dir, aggregate)?.publish()
    }
}

impl StagedOutput {
    /// Final location the staged file will be renamed to.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Number of rows written.
    pub fn keys(&self) -> usize {
        self.keys
    }

    /// Atomically rename the staged file over the destination.
    pub fn publish(self) -> Result<PathBuf, RollupError> {
        let destination = self.destination;
        self.temp
            .persist(&destination)
            .map_err(|err| RollupError::write(destination.to_string_lossy(), err.error))?;
        sync_parent_dir(&destination);
        Ok(destination)
    }
}

/// Render one output row: `cname;firstseen;lastseen`.
pub fn render_line(cname: &str, span: &KeySpan, format: TimestampFormat) -> String {
    format!(
        "{cname}{OUTPUT_DELIMITER}{}{OUTPUT_DELIMITER}{}",
        render_time(span.first_seen, format),
        render_time(span.last_seen, format)
    )
}

/// Render one timestamp; undefined renders as the empty string.
pub fn render_time(time: Option<EpochSeconds>, format: TimestampFormat) -> String {
    match (time, format) {
        (None, _) => String::new(),
        (Some(seconds), TimestampFormat::EpochSeconds) => seconds.to_string(),
        (Some(seconds), TimestampFormat::DateTime) => DateTime::from_timestamp(seconds, 0)
            .map(|at| at.format(DATETIME_FORMAT).to_string())
            .unwrap_or_default(),
    }
}

fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::config::MergePolicy;
    use crate::data::Observation;
    use std::fs;
    use tempfile::tempdir;

    fn sample_aggregate() -> FileAggregate {
        let mut aggregator = Aggregator::new(MergePolicy::WholeFile);
        aggregator.absorb(vec![
            Observation::new("a", Some(100)),
            Observation::new("b", Some(200)),
            Observation::new("a", Some(50)),
            Observation::new("c", None),
        ]);
        aggregator.finish()
    }

    #[test]
    fn render_line_uses_empty_fields_for_undefined_times() {
        assert_eq!(
            render_line("a", &KeySpan::default(), TimestampFormat::EpochSeconds),
            "a;;"
        );
        assert_eq!(
            render_line(
                "a",
                &KeySpan {
                    first_seen: Some(50),
                    last_seen: Some(100)
                },
                TimestampFormat::DateTime
            ),
            "a;1970-01-01 00:00:50;1970-01-01 00:01:40"
        );
    }

    #[test]
    fn write_replaces_existing_output_atomically() {
        let dir = tempdir().unwrap();
        let input = Path::new("input/com/part-1.csv");
        let target = dir.path().join("part-1.csv");
        fs::write(&target, "stale;1;1\nextra;2;2\n").unwrap();

        let written = ShardWriter::default()
            .write(input, dir.path(), &sample_aggregate())
            .unwrap();
        assert_eq!(written, target);
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "a;50;100\nb;200;200\nc;;\n"
        );
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn dropped_stage_leaves_destination_untouched() {
        let dir = tempdir().unwrap();
        let input = Path::new("part-2.csv");
        let staged = ShardWriter::default()
            .stage(input, dir.path(), &sample_aggregate())
            .unwrap();
        assert_eq!(staged.keys(), 3);
        assert_eq!(staged.destination(), dir.path().join("part-2.csv"));
        drop(staged);
        assert!(!dir.path().join("part-2.csv").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn stage_into_missing_directory_is_a_write_error() {
        let dir = tempdir().unwrap();
        let err = ShardWriter::default()
            .stage(
                Path::new("x.csv"),
                &dir.path().join("missing"),
                &sample_aggregate(),
            )
            .unwrap_err();
        assert!(matches!(err, RollupError::Write { .. }));
    }
}
