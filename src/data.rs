use indexmap::IndexMap;

use crate::types::{Cname, EpochSeconds};

/// One input row: a cname and its (possibly unparsable) observation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    /// Grouping key.
    pub cname: Cname,
    /// Observation time; `None` when the source value was not a valid epoch second count.
    pub leaf_time: Option<EpochSeconds>,
}

impl Observation {
    /// Build an observation from parts.
    pub fn new(cname: impl Into<Cname>, leaf_time: Option<EpochSeconds>) -> Self {
        Self {
            cname: cname.into(),
            leaf_time,
        }
    }
}

/// First/last seen span of one key.
///
/// Both bounds are `None` until a defined timestamp is observed; once set,
/// `first_seen <= last_seen` holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeySpan {
    /// Earliest defined observation time.
    pub first_seen: Option<EpochSeconds>,
    /// Latest defined observation time.
    pub last_seen: Option<EpochSeconds>,
}

impl KeySpan {
    /// Span covering exactly `time` (or the empty span for `None`).
    pub fn at(time: Option<EpochSeconds>) -> Self {
        Self {
            first_seen: time,
            last_seen: time,
        }
    }

    /// Widen the span to include `time`; undefined times are ignored.
    pub fn observe(&mut self, time: Option<EpochSeconds>) {
        let Some(time) = time else {
            return;
        };
        self.first_seen = Some(self.first_seen.map_or(time, |current| current.min(time)));
        self.last_seen = Some(self.last_seen.map_or(time, |current| current.max(time)));
    }

    /// Widen the span to include every time covered by `other`.
    pub fn merge(&mut self, other: KeySpan) {
        self.observe(other.first_seen);
        self.observe(other.last_seen);
    }

    /// True when no defined timestamp contributed to this span.
    pub fn is_undefined(&self) -> bool {
        self.first_seen.is_none() && self.last_seen.is_none()
    }
}

/// Per-file aggregate table in first-occurrence order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileAggregate {
    pub(crate) spans: IndexMap<Cname, KeySpan>,
    /// Rows consumed from the input file.
    pub records: usize,
    /// Rows whose timestamp was undefined.
    pub undefined_times: usize,
    /// Batches consumed from the input file.
    pub batches: usize,
}

impl FileAggregate {
    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns `true` when no key was observed.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Span for `cname`, if the key was observed.
    pub fn get(&self, cname: &str) -> Option<&KeySpan> {
        self.spans.get(cname)
    }

    /// Keys and spans in output order.
    pub fn iter(&self) -> impl Iterator<Item = (&Cname, &KeySpan)> {
        self.spans.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_ignores_undefined_times() {
        let mut span = KeySpan::default();
        span.observe(None);
        assert!(span.is_undefined());
        span.observe(Some(100));
        span.observe(None);
        span.observe(Some(50));
        assert_eq!(span, KeySpan {
            first_seen: Some(50),
            last_seen: Some(100)
        });
    }

    #[test]
    fn merge_widens_both_bounds() {
        let mut span = KeySpan::at(Some(10));
        span.merge(KeySpan {
            first_seen: Some(5),
            last_seen: Some(20),
        });
        span.merge(KeySpan::default());
        assert_eq!(span.first_seen, Some(5));
        assert_eq!(span.last_seen, Some(20));

        let mut empty = KeySpan::default();
        empty.merge(KeySpan::at(Some(7)));
        assert_eq!(empty, KeySpan::at(Some(7)));
    }
}
