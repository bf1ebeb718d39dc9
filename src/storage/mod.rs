//! Storage Module
//!
//! Persistent columnar storage: immutable segment files, the per-table
//! manifest naming the live ones, and compaction.
//!
//! ## Responsibilities
//! - Encode flushed batches into self-describing segment files
//! - Decode only the column blocks a read asks for
//! - Keep the ordered live segment list durable across restarts
//! - Merge contiguous runs of segments without reordering rows
//!
//! ## Table Directory Layout
//! ```text
//! {data_dir}/tables/{table}/
//! ├── MANIFEST                  live segment ids + schema registry
//! └── segments/
//!     ├── seg_00000001.dsto
//!     ├── seg_00000002.dsto
//!     └── ...
//! ```

mod compaction;
mod filter;
mod manager;
mod manifest;
pub mod segment;

pub use compaction::{
    CompactionPolicy, CompactionStrategy, MergeAll, SelectedSegments, SmallSegments,
};
pub use filter::{AllSegments, SegmentFilter};
pub use manager::{SegmentEntry, SegmentManager, TableSnapshot, UnreadableSegment, SEGMENTS_DIR};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use segment::{
    Segment, SegmentFooter, SegmentHandle, SegmentId, SegmentReader, SegmentStats, SegmentWriter,
    WriteOptions,
};
