//! Compaction strategies
//!
//! A strategy only chooses which segments to merge. The merge itself, the
//! atomic swap in the live list and retirement of the inputs belong to
//! [`SegmentManager::compact`](super::SegmentManager::compact).
//!
//! Candidates must always form a contiguous run of the live list in list
//! order; merging anything else would reorder rows. A strategy is handed one
//! gap-free run at a time: a listed segment that cannot be opened splits the
//! live list, and nothing is ever merged across it.

use serde::{Deserialize, Serialize};

use super::segment::{SegmentHandle, SegmentId};

/// Picks merge candidates from an ordered run of live segments
pub trait CompactionStrategy: Send + Sync {
    /// A contiguous sub-run of `segments`, or empty when there is nothing to do
    fn choose_candidates(&self, segments: &[SegmentHandle]) -> Vec<SegmentHandle>;
}

/// Merge a whole run once it has at least `min_segments` entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeAll {
    pub min_segments: usize,
}

impl CompactionStrategy for MergeAll {
    fn choose_candidates(&self, segments: &[SegmentHandle]) -> Vec<SegmentHandle> {
        if segments.len() >= self.min_segments.max(2) {
            segments.to_vec()
        } else {
            Vec::new()
        }
    }
}

/// Merge the longest run of segments below `max_rows` rows each
///
/// Ties go to the oldest run. Runs shorter than `min_segments` are left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallSegments {
    pub max_rows: u64,
    pub min_segments: usize,
}

impl CompactionStrategy for SmallSegments {
    fn choose_candidates(&self, segments: &[SegmentHandle]) -> Vec<SegmentHandle> {
        let mut best: Option<(usize, usize)> = None;
        let mut start = 0;

        for end in 0..=segments.len() {
            let small = end < segments.len() && segments[end].row_count() < self.max_rows;
            if small {
                continue;
            }
            let len = end - start;
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((start, len));
            }
            start = end + 1;
        }

        match best {
            Some((start, len)) if len >= self.min_segments.max(2) => {
                segments[start..start + len].to_vec()
            }
            _ => Vec::new(),
        }
    }
}

/// Merge exactly the listed segments, if all are still live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedSegments {
    pub ids: Vec<SegmentId>,
}

impl CompactionStrategy for SelectedSegments {
    fn choose_candidates(&self, segments: &[SegmentHandle]) -> Vec<SegmentHandle> {
        let chosen: Vec<SegmentHandle> = segments
            .iter()
            .filter(|s| self.ids.contains(&s.id()))
            .cloned()
            .collect();
        if chosen.len() == self.ids.len() {
            chosen
        } else {
            Vec::new()
        }
    }
}

/// Serializable choice of strategy, as it appears in configuration
///
/// `small_segments` without `max_rows` treats anything below the flush row
/// threshold as small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case", deny_unknown_fields)]
pub enum CompactionPolicy {
    MergeAll {
        min_segments: usize,
    },
    SmallSegments {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_rows: Option<u64>,
        min_segments: usize,
    },
}

impl CompactionPolicy {
    /// Instantiate the strategy; `flush_max_rows` fills in an unset `max_rows`
    pub fn build(&self, flush_max_rows: usize) -> Box<dyn CompactionStrategy> {
        match *self {
            CompactionPolicy::MergeAll { min_segments } => Box::new(MergeAll { min_segments }),
            CompactionPolicy::SmallSegments {
                max_rows,
                min_segments,
            } => Box::new(SmallSegments {
                max_rows: max_rows.unwrap_or(flush_max_rows as u64),
                min_segments,
            }),
        }
    }

    pub fn min_segments(&self) -> usize {
        match *self {
            CompactionPolicy::MergeAll { min_segments } => min_segments,
            CompactionPolicy::SmallSegments { min_segments, .. } => min_segments,
        }
    }
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        CompactionPolicy::SmallSegments {
            max_rows: None,
            min_segments: 4,
        }
    }
}
