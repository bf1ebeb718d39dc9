//! Segment filters
//!
//! A filter sees only footer statistics and answers "might this segment
//! hold rows I care about?". Returning `false` skips the segment without
//! reading any of its column blocks; a filter must therefore only reject a
//! segment when its statistics prove no row can match.

use super::segment::SegmentStats;

/// Decides per segment whether its blocks are read
pub trait SegmentFilter {
    fn select(&self, stats: &SegmentStats) -> bool;
}

impl<F> SegmentFilter for F
where
    F: Fn(&SegmentStats) -> bool,
{
    fn select(&self, stats: &SegmentStats) -> bool {
        self(stats)
    }
}

/// Reads every segment
#[derive(Debug, Clone, Copy, Default)]
pub struct AllSegments;

impl SegmentFilter for AllSegments {
    fn select(&self, _stats: &SegmentStats) -> bool {
        true
    }
}
