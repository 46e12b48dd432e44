use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::DateTime;

use crate::constants::reader::{INPUT_DELIMITER, INPUT_QUOTE};
use crate::data::Observation;
use crate::errors::RollupError;
use crate::types::EpochSeconds;

/// Streams one input file as ordered batches of at most `chunk_size` observations.
///
/// Only the current batch and a single line buffer are held in memory.
pub struct ChunkReader {
    path: PathBuf,
    reader: BufReader<File>,
    chunk_size: usize,
    line: Vec<u8>,
    done: bool,
}

impl ChunkReader {
    /// Open `path` for batched reading.
    pub fn open(path: impl Into<PathBuf>, chunk_size: usize) -> Result<Self, RollupError> {
        let path = path.into();
        if chunk_size == 0 {
            return Err(RollupError::Configuration(
                "chunk size must be at least 1".to_string(),
            ));
        }
        let file = File::open(&path)
            .map_err(|err| RollupError::read(path.to_string_lossy(), err))?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            chunk_size,
            line: Vec::new(),
            done: false,
        })
    }

    /// Path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next_batch(&mut self) -> Result<Vec<Observation>, RollupError> {
        let mut batch = Vec::with_capacity(self.chunk_size.min(4096));
        while batch.len() < self.chunk_size {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .map_err(|err| RollupError::read(self.path.to_string_lossy(), err))?;
            if read == 0 {
                self.done = true;
                break;
            }
            if let Some(observation) = parse_line(&String::from_utf8_lossy(&self.line)) {
                batch.push(observation);
            }
        }
        Ok(batch)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Vec<Observation>, RollupError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(batch) if batch.is_empty() => None,
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Parse one `cname,leafTime` row.
///
/// Returns `None` for blank rows and rows without a cname. Columns past the
/// second are ignored.
pub fn parse_line(line: &str) -> Option<Observation> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut fields = line.split(INPUT_DELIMITER);
    let cname = unquote(fields.next()?);
    if cname.is_empty() {
        return None;
    }
    let leaf_time = fields.next().and_then(parse_leaf_time);
    Some(Observation::new(cname, leaf_time))
}

/// Parse a Unix epoch second count; anything else is undefined.
///
/// Values outside the calendar range `chrono` can represent are undefined too.
pub fn parse_leaf_time(raw: &str) -> Option<EpochSeconds> {
    let seconds = unquote(raw).parse::<EpochSeconds>().ok()?;
    DateTime::from_timestamp(seconds, 0).map(|_| seconds)
}

fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix(INPUT_QUOTE)
        .and_then(|inner| inner.strip_suffix(INPUT_QUOTE))
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parse_line_handles_missing_and_garbage_times() {
        assert_eq!(
            parse_line("a.example.com,100\n"),
            Some(Observation::new("a.example.com", Some(100)))
        );
        assert_eq!(
            parse_line("a.example.com,not-a-number"),
            Some(Observation::new("a.example.com", None))
        );
        assert_eq!(
            parse_line("a.example.com,"),
            Some(Observation::new("a.example.com", None))
        );
        assert_eq!(
            parse_line("a.example.com"),
            Some(Observation::new("a.example.com", None))
        );
        assert_eq!(
            parse_line("\"b.example.com\",\"200\",extra\r\n"),
            Some(Observation::new("b.example.com", Some(200)))
        );
        assert_eq!(parse_line("\n"), None);
        assert_eq!(parse_line(",100"), None);
    }

    #[test]
    fn parse_leaf_time_rejects_out_of_range_seconds() {
        assert_eq!(parse_leaf_time(" 1700000000 "), Some(1_700_000_000));
        assert_eq!(parse_leaf_time("-5"), Some(-5));
        assert_eq!(parse_leaf_time("1.5"), None);
        assert_eq!(parse_leaf_time(&i64::MAX.to_string()), None);
    }

    #[test]
    fn batches_preserve_file_order_and_size_bound() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        fs::write(&path, "a,1\nb,2\n\nc,3\nd,x\ne,5").unwrap();

        let batches: Vec<Vec<Observation>> = ChunkReader::open(&path, 2)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let names: Vec<&str> = batches
            .iter()
            .flatten()
            .map(|obs| obs.cname.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(batches[1][1].leaf_time, None);
    }

    #[test]
    fn empty_file_yields_no_batches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();
        assert_eq!(ChunkReader::open(&path, 10).unwrap().count(), 0);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.csv");
        fs::write(&path, b"ok.com,1\nbad\xff.com,2\n").unwrap();
        let rows: Vec<Observation> = ChunkReader::open(&path, 10)
            .unwrap()
            .flat_map(|batch| batch.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].leaf_time, Some(2));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        let err = ChunkReader::open(dir.path().join("absent.csv"), 10)
            .err()
            .unwrap();
        assert!(matches!(err, RollupError::Read { .. }));
    }
}
