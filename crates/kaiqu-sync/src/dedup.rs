use std::collections::HashSet;

use kaiqu_core::{DedupKey, Record};
use serde::Serialize;

/// An admitted record tagged with the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcedRecord {
    pub source_id: String,
    pub record: Record,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub retained: Vec<SourcedRecord>,
    pub dropped: usize,
}

/// First occurrence of a `(url, open_time)` key wins; later ones are dropped as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, items: Vec<SourcedRecord>) -> DedupOutcome {
        let mut seen: HashSet<DedupKey> = HashSet::with_capacity(items.len());
        let mut outcome = DedupOutcome::default();
        for item in items {
            if seen.insert(item.record.dedup_key()) {
                outcome.retained.push(item);
            } else {
                outcome.dropped += 1;
            }
        }
        outcome
    }
}
