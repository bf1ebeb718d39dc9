//! Table Module
//!
//! One named table: its schema registry, ingestion buffer, and segment store.
//!
//! ## Responsibilities
//! - Route writes into the buffer and flush it when a threshold is crossed
//! - Serve reads across the live segments, the in-flight flush batch, and
//!   nothing else (buffered rows become visible once flushed)
//! - Run compaction with a caller-chosen strategy
//!
//! ## Flush lifecycle
//! ```text
//! buffer ──take──► staged batch ──write──► segment file ──publish──► live list
//!                  (visible to reads)                     (staged batch cleared)
//! ```
//! A failed write or publish leaves the staged batch in place; the next
//! flush retries that same batch before taking anything new from the buffer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::batch::{ColumnarBatch, Row};
use crate::config::Config;
use crate::error::{DistribuitoError, Result};
use crate::memtable::MemTable;
use crate::schema::{ColumnId, SchemaRegistry, SchemaSnapshot, ValueType};
use crate::storage::{
    CompactionStrategy, Manifest, SegmentEntry, SegmentFilter, SegmentHandle, SegmentId,
    SegmentManager,
};

// =============================================================================
// Results
// =============================================================================

/// Outcome of a write
#[derive(Debug)]
pub struct WriteReceipt {
    /// Rows accepted into the buffer
    pub rows: usize,
    /// Segment produced by an automatic flush triggered by this write
    pub flushed: Option<SegmentId>,
    /// Error of that automatic flush; the rows stay safe in the staged batch
    pub flush_error: Option<DistribuitoError>,
}

/// Data read from one segment
#[derive(Debug)]
pub struct SegmentRead {
    pub segment_id: SegmentId,
    pub result: Result<ColumnarBatch>,
}

/// Everything a read produced, segment by segment
#[derive(Debug, Default)]
pub struct ReadOutput {
    /// Requested columns, in request order
    pub columns: Vec<ColumnId>,
    /// One entry per segment that passed the filter, in table order
    pub segments: Vec<SegmentRead>,
    /// Segments the filter skipped without reading
    pub pruned: Vec<SegmentId>,
    /// Rows of a flush that has been taken from the buffer but not published
    pub in_flight: Option<ColumnarBatch>,
}

impl ReadOutput {
    /// Segments that failed to read
    pub fn errors(&self) -> impl Iterator<Item = (SegmentId, &DistribuitoError)> {
        self.segments
            .iter()
            .filter_map(|s| s.result.as_ref().err().map(|e| (s.segment_id, e)))
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Concatenate every segment then the in-flight batch, in table order
    ///
    /// Fails with the first per-segment error.
    pub fn into_batch(self) -> Result<ColumnarBatch> {
        let mut out = ColumnarBatch::new(0).project(&self.columns);
        for read in self.segments {
            out.append(&read.result?);
        }
        if let Some(batch) = self.in_flight {
            out.append(&batch);
        }
        Ok(out)
    }

    /// Rows returned across all readable parts
    pub fn row_count(&self) -> usize {
        let stored: usize = self
            .segments
            .iter()
            .filter_map(|s| s.result.as_ref().ok())
            .map(ColumnarBatch::row_count)
            .sum();
        stored + self.in_flight.as_ref().map_or(0, ColumnarBatch::row_count)
    }
}

/// What a compaction request did
#[derive(Debug)]
pub enum CompactionOutcome {
    /// The strategy found nothing worth merging
    Skipped,
    Compacted {
        inputs: Vec<SegmentId>,
        output: SegmentHandle,
    },
}

// =============================================================================
// Table
// =============================================================================

/// A named table
///
/// ## Concurrency:
/// - Writers share the buffer mutex only for the duration of an append
/// - `flush_lock`: one flush at a time; auto-flush skips if one is running
/// - Reads clone the live list under a read lock and never wait on I/O
pub struct Table {
    name: String,
    dir: PathBuf,
    memtable: MemTable,
    manager: SegmentManager,
    flush_lock: Mutex<()>,
    dropped: AtomicBool,
}

impl Table {
    /// Create a new table directory with optional pre-declared columns
    pub fn create(
        dir: &Path,
        name: &str,
        columns: &[(String, ValueType)],
        config: &Config,
    ) -> Result<Self> {
        if Manifest::path_in(dir).exists() {
            return Err(DistribuitoError::TableExists(name.to_string()));
        }
        Self::check_declarations(columns)?;
        fs::create_dir_all(dir)?;

        let table = Self::open(dir, name, config)?;
        for (column, value_type) in columns {
            table.registry().register_or_get(column, *value_type)?;
        }
        table.manager.persist_schema()?;

        info!(table = name, columns = columns.len(), "Created table");
        Ok(table)
    }

    /// Reject `null` types and a name declared twice with different types
    fn check_declarations(columns: &[(String, ValueType)]) -> Result<()> {
        let scratch = SchemaRegistry::new();
        for (column, value_type) in columns {
            if *value_type == ValueType::Null {
                return Err(DistribuitoError::Config(format!(
                    "column '{}' needs a concrete type",
                    column
                )));
            }
            scratch.register_or_get(column, *value_type)?;
        }
        Ok(())
    }

    /// Open an existing table directory
    pub fn open(dir: &Path, name: &str, config: &Config) -> Result<Self> {
        let manager = SegmentManager::open(dir, config.write_options())?;
        let memtable = MemTable::new(Arc::clone(manager.registry()), config.flush_thresholds());

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            memtable,
            manager,
            flush_lock: Mutex::new(()),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.manager.registry()
    }

    pub fn manager(&self) -> &SegmentManager {
        &self.manager
    }

    /// Rows waiting in the buffer
    pub fn buffered_rows(&self) -> usize {
        self.memtable.row_count()
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append rows; flushes automatically once a threshold is crossed
    ///
    /// Rows are validated as a unit. The automatic flush is skipped when
    /// another flush is already running; its outcome is reported in the
    /// receipt rather than as an error, since the rows themselves were accepted.
    pub fn write(&self, rows: &[Row]) -> Result<WriteReceipt> {
        self.memtable.append_rows(rows)?;

        let mut receipt = WriteReceipt {
            rows: rows.len(),
            flushed: None,
            flush_error: None,
        };

        if self.memtable.should_flush() {
            if let Some(_flush) = self.flush_lock.try_lock() {
                match self.flush_locked() {
                    Ok(handle) => receipt.flushed = handle.map(|h| h.id()),
                    Err(e) => {
                        warn!(table = %self.name, error = %e, "Automatic flush failed");
                        receipt.flush_error = Some(e);
                    }
                }
            } else {
                debug!(table = %self.name, "Flush already running, rows stay buffered");
            }
        }

        Ok(receipt)
    }

    /// Flush the buffer into a new segment
    ///
    /// Returns the last segment written, or `None` when there was nothing to
    /// flush. A batch left staged by an earlier failed flush is published
    /// first, then whatever has been buffered since.
    pub fn flush(&self) -> Result<Option<SegmentHandle>> {
        let _flush = self.flush_lock.lock();
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<Option<SegmentHandle>> {
        let mut flushed = None;

        if let Some(batch) = self.manager.staged() {
            debug!(table = %self.name, rows = batch.row_count(), "Retrying staged flush");
            flushed = Some(self.publish_staged(&batch)?);
        }

        if !self.memtable.is_empty() {
            let batch = Arc::new(self.memtable.take_and_reset());
            if !batch.is_empty() {
                self.manager.stage_flush(Arc::clone(&batch));
                flushed = Some(self.publish_staged(&batch)?);
            }
        }

        Ok(flushed)
    }

    fn publish_staged(&self, batch: &ColumnarBatch) -> Result<SegmentHandle> {
        let handle = self.manager.write_segment(batch)?;
        self.manager.publish_flush(Arc::clone(&handle))?;

        info!(
            table = %self.name,
            segment = handle.id(),
            rows = handle.row_count(),
            bytes = handle.file_size(),
            "Flushed buffer to segment"
        );
        Ok(handle)
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read `column_ids` from every segment the filter selects
    ///
    /// Segments are read in table order. A segment that fails, or could not
    /// be opened at all, is reported in its own slot and does not stop the others. Buffered rows that have
    /// not been taken for a flush are not part of the result.
    pub fn read<F>(&self, column_ids: &[ColumnId], filter: &F) -> Result<ReadOutput>
    where
        F: SegmentFilter + ?Sized,
    {
        for &id in column_ids {
            self.registry().lookup(id)?;
        }

        let snapshot = self.manager.snapshot();
        let mut output = ReadOutput {
            columns: column_ids.to_vec(),
            ..Default::default()
        };

        for entry in &snapshot.entries {
            let segment = match entry {
                SegmentEntry::Live(segment) => segment,
                SegmentEntry::Unreadable(broken) => {
                    output.segments.push(SegmentRead {
                        segment_id: broken.id,
                        result: Err(DistribuitoError::corrupt(&broken.path, broken.reason.clone())),
                    });
                    continue;
                }
            };
            if !filter.select(&segment.segment_stats()) {
                debug!(table = %self.name, segment = segment.id(), "Pruned segment");
                output.pruned.push(segment.id());
                continue;
            }
            let result = segment.read_columns(column_ids);
            if let Err(e) = &result {
                warn!(table = %self.name, segment = segment.id(), error = %e, "Segment read failed");
            }
            output.segments.push(SegmentRead {
                segment_id: segment.id(),
                result,
            });
        }

        output.in_flight = snapshot.in_flight.map(|batch| batch.project(column_ids));
        Ok(output)
    }

    /// Like [`read`](Self::read) with column names; unknown names fail with `UnknownColumn`
    pub fn read_named<F>(&self, names: &[&str], filter: &F) -> Result<ReadOutput>
    where
        F: SegmentFilter + ?Sized,
    {
        let ids = names
            .iter()
            .map(|name| {
                self.registry()
                    .id_of(name)
                    .ok_or_else(|| DistribuitoError::UnknownColumn(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.read(&ids, filter)
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Merge the segments `strategy` picks
    ///
    /// The strategy sees each gap-free run of live segments separately; the
    /// longest pick wins and ties go to the oldest run.
    pub fn compact(&self, strategy: &dyn CompactionStrategy) -> Result<CompactionOutcome> {
        let mut candidates: Vec<SegmentHandle> = Vec::new();
        for run in self.manager.runs() {
            let picked = strategy.choose_candidates(&run);
            if picked.len() > candidates.len() {
                candidates = picked;
            }
        }
        if candidates.is_empty() {
            return Ok(CompactionOutcome::Skipped);
        }
        let inputs = candidates.iter().map(|s| s.id()).collect();
        let output = self.manager.compact(&candidates)?;
        Ok(CompactionOutcome::Compacted { inputs, output })
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Column name → (id, type)
    pub fn schema(&self) -> BTreeMap<String, (ColumnId, ValueType)> {
        self.registry().snapshot().to_map()
    }

    pub fn schema_snapshot(&self) -> SchemaSnapshot {
        self.registry().snapshot()
    }

    /// Live segments, oldest rows first
    pub fn segments(&self) -> Vec<SegmentHandle> {
        self.manager.list()
    }

    /// Delete the table directory once the last handle is dropped
    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if !self.dropped.load(Ordering::Acquire) {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => info!(table = %self.name, "Deleted dropped table"),
            Err(e) => warn!(table = %self.name, error = %e, "Failed to delete dropped table"),
        }
    }
}
