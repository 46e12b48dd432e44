//! Per-batch grouping and file-level folding of cname spans.
//!
//! Within a batch, keys are grouped and ordered by `(cname, leaf_time)`, so the
//! first occurrence of each key in that ordering fixes where it lands in the
//! output: keys first seen in the same batch appear in ascending cname order,
//! and keys first seen in later batches follow keys from earlier batches.
//!
//! Under [`MergePolicy::FirstBatchWins`] the span kept for a key is the one
//! computed from the batch it first appeared in, so results depend on the
//! chunk size. Under [`MergePolicy::WholeFile`] spans are merged across all
//! batches and match a whole-file min/max for any chunk size.

use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use tracing::debug;

use crate::config::MergePolicy;
use crate::data::{FileAggregate, KeySpan, Observation};
use crate::errors::RollupError;
use crate::reader::ChunkReader;

/// Group one batch by cname and compute each key's span over that batch only.
///
/// Keys are returned in ascending cname order.
pub fn summarize_batch(batch: &[Observation]) -> Vec<(&str, KeySpan)> {
    let mut grouped: BTreeMap<&str, KeySpan> = BTreeMap::new();
    for observation in batch {
        grouped
            .entry(observation.cname.as_str())
            .or_default()
            .observe(observation.leaf_time);
    }
    grouped.into_iter().collect()
}

/// Folds batches of one file into a [`FileAggregate`].
#[derive(Debug)]
pub struct Aggregator {
    policy: MergePolicy,
    spans: IndexMap<String, KeySpan>,
    records: usize,
    undefined_times: usize,
    batches: usize,
}

impl Aggregator {
    /// Create an empty aggregator using `policy` for keys spanning several batches.
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            spans: IndexMap::new(),
            records: 0,
            undefined_times: 0,
            batches: 0,
        }
    }

    /// Merge one batch into the file-level table.
    ///
    /// The batch is consumed and dropped before returning.
    pub fn absorb(&mut self, batch: Vec<Observation>) {
        self.batches += 1;
        self.records += batch.len();
        self.undefined_times += batch.iter().filter(|obs| obs.leaf_time.is_none()).count();
        for (cname, span) in summarize_batch(&batch) {
            match self.spans.get_mut(cname) {
                Some(existing) => {
                    if self.policy == MergePolicy::WholeFile {
                        existing.merge(span);
                    }
                }
                None => {
                    self.spans.insert(cname.to_string(), span);
                }
            }
        }
    }

    /// Number of distinct keys folded so far.
    pub fn key_count(&self) -> usize {
        self.spans.len()
    }

    /// Finish folding and return the table.
    pub fn finish(self) -> FileAggregate {
        FileAggregate {
            spans: self.spans,
            records: self.records,
            undefined_times: self.undefined_times,
            batches: self.batches,
        }
    }
}

/// Stream `path` in batches of `chunk_size` and fold it under `policy`.
///
/// `on_batch` runs after each batch is merged and may abort the file by
/// returning an error (used for claim heartbeats).
pub fn aggregate_file<F>(
    path: &Path,
    chunk_size: usize,
    policy: MergePolicy,
    mut on_batch: F,
) -> Result<FileAggregate, RollupError>
where
    F: FnMut(&Aggregator) -> Result<(), RollupError>,
{
    let mut aggregator = Aggregator::new(policy);
    for batch in ChunkReader::open(path, chunk_size)? {
        aggregator.absorb(batch?);
        on_batch(&aggregator)?;
    }
    debug!(
        file = %path.display(),
        batches = aggregator.batches,
        records = aggregator.records,
        keys = aggregator.key_count(),
        "aggregated file"
    );
    Ok(aggregator.finish())
}
