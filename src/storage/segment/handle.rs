//! Shared segment handles
//!
//! A [`SegmentHandle`] is an `Arc<Segment>`. The table's live list holds one
//! reference and every in-progress read clones another, so a segment retired
//! by compaction stays readable until the last reader lets go. The file is
//! deleted when the final reference drops.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::ColumnarBatch;
use crate::codec::ColumnStats;
use crate::error::Result;
use crate::schema::{ColumnId, Value};

use super::{SegmentFooter, SegmentId, SegmentReader};

/// Shared, reference-counted segment
pub type SegmentHandle = Arc<Segment>;

/// An open, immutable segment
pub struct Segment {
    id: SegmentId,
    // Declared before `file` so the descriptor closes before the unlink
    reader: SegmentReader<File>,
    file: SegmentFile,
}

/// Removes the backing file on drop once the segment is retired
struct SegmentFile {
    path: PathBuf,
    retired: AtomicBool,
}

impl Drop for SegmentFile {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Deleted retired segment"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to delete retired segment"
            ),
        }
    }
}

impl Segment {
    /// Open the segment file at `path`
    pub fn open(id: SegmentId, path: &Path) -> Result<Self> {
        let reader = SegmentReader::open(path)?;
        Ok(Self {
            id,
            reader,
            file: SegmentFile {
                path: path.to_path_buf(),
                retired: AtomicBool::new(false),
            },
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn row_count(&self) -> u64 {
        self.reader.row_count()
    }

    pub fn file_size(&self) -> u64 {
        self.reader.file_size()
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.reader.column_ids()
    }

    pub fn footer(&self) -> &SegmentFooter {
        self.reader.footer()
    }

    /// Footer statistics for one column (no block I/O)
    pub fn stats(&self, id: ColumnId) -> ColumnStats {
        self.reader.stats(id)
    }

    /// Everything a segment filter may look at
    pub fn segment_stats(&self) -> SegmentStats {
        SegmentStats {
            segment_id: self.id,
            row_count: self.reader.row_count(),
            columns: self
                .reader
                .footer()
                .entries
                .iter()
                .map(|(id, entry)| (*id, entry.stats()))
                .collect(),
        }
    }

    pub fn read_column(&self, id: ColumnId) -> Result<Vec<Value>> {
        self.reader.read_column(id)
    }

    pub fn read_columns(&self, ids: &[ColumnId]) -> Result<ColumnarBatch> {
        self.reader.read_columns(ids)
    }

    /// Every stored column
    pub fn read_all(&self) -> Result<ColumnarBatch> {
        self.reader.read_columns(&self.reader.column_ids())
    }

    /// Mark the file for deletion once the last handle drops
    pub(crate) fn retire(&self) {
        self.file.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.file.retired.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.file.path)
            .field("rows", &self.row_count())
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Footer-level statistics of one segment, handed to segment filters
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    pub segment_id: SegmentId,
    pub row_count: u64,
    columns: BTreeMap<ColumnId, ColumnStats>,
}

impl SegmentStats {
    /// Statistics for `id`; a column the segment lacks is all-null
    pub fn column(&self, id: ColumnId) -> ColumnStats {
        self.columns
            .get(&id)
            .cloned()
            .unwrap_or_else(|| ColumnStats::all_null(self.row_count))
    }

    /// Whether the segment stores any value for `id`
    pub fn has_column(&self, id: ColumnId) -> bool {
        self.columns.contains_key(&id)
    }
}
