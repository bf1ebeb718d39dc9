//! Segment Manager
//!
//! Owns the ordered live segment list of one table.
//!
//! ## Responsibilities
//! - Recover the live list and schema from the manifest on startup
//! - Delete orphaned and partially written segment files
//! - Write new segments from flushed or merged batches
//! - Publish new segments and compaction results atomically
//! - Retire compacted inputs so their files go away with the last reader
//!
//! ## Publication order
//! ```text
//! write seg_N.dsto.tmp ─► fsync ─► rename ─► rewrite MANIFEST ─► swap live list
//! ```
//! A segment file only counts once the manifest names it, so a crash at any
//! step leaves the previous list intact; leftovers are cleaned up at open.

use std::collections::HashSet;
use std::fs;
use std::io::BufWriter;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::batch::ColumnarBatch;
use crate::error::{DistribuitoError, Result};
use crate::schema::SchemaRegistry;

use super::manifest::Manifest;
use super::segment::{
    write_segment_file, Segment, SegmentHandle, SegmentId, SegmentSink, WriteOptions,
};

/// Subdirectory of a table holding its segment files
pub const SEGMENTS_DIR: &str = "segments";

/// A listed segment that could not be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableSegment {
    pub id: SegmentId,
    pub path: PathBuf,
    pub reason: String,
}

/// One slot of a table's ordered segment list
///
/// An unreadable segment keeps its slot so its rows, once the file is
/// repaired, come back in their original position.
#[derive(Debug, Clone)]
pub enum SegmentEntry {
    Live(SegmentHandle),
    Unreadable(UnreadableSegment),
}

impl SegmentEntry {
    pub fn id(&self) -> SegmentId {
        match self {
            SegmentEntry::Live(segment) => segment.id(),
            SegmentEntry::Unreadable(broken) => broken.id,
        }
    }

    pub fn as_live(&self) -> Option<&SegmentHandle> {
        match self {
            SegmentEntry::Live(segment) => Some(segment),
            SegmentEntry::Unreadable(_) => None,
        }
    }
}

/// Consistent view of a table's stored data at one instant
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    /// Every listed segment in table order, oldest rows first
    pub entries: Vec<SegmentEntry>,
    /// Batch taken from the buffer whose segment is not published yet
    pub in_flight: Option<Arc<ColumnarBatch>>,
}

impl TableSnapshot {
    /// Segments that opened, in table order
    pub fn segments(&self) -> Vec<SegmentHandle> {
        self.entries.iter().filter_map(SegmentEntry::as_live).cloned().collect()
    }

    /// Listed segments that failed to open, in table order
    pub fn unreadable(&self) -> Vec<UnreadableSegment> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                SegmentEntry::Unreadable(broken) => Some(broken.clone()),
                SegmentEntry::Live(_) => None,
            })
            .collect()
    }
}

#[derive(Default)]
struct ManagerState {
    entries: Vec<SegmentEntry>,
    in_flight: Option<Arc<ColumnarBatch>>,
}

impl ManagerState {
    fn live(&self) -> impl Iterator<Item = &SegmentHandle> {
        self.entries.iter().filter_map(SegmentEntry::as_live)
    }
}

/// Manages the segments of one table
///
/// ## Concurrency:
/// - `state`: RwLock held only to clone or swap the list, never across I/O
/// - `publish_lock`: serializes manifest rewrites so no update is lost
/// - `compaction_lock`: at most one compaction at a time
/// - `next_segment_id`: atomic counter (lock-free)
pub struct SegmentManager {
    segments_dir: PathBuf,
    manifest_path: PathBuf,
    registry: Arc<SchemaRegistry>,
    options: WriteOptions,
    state: RwLock<ManagerState>,
    next_segment_id: AtomicU64,
    publish_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
}

impl SegmentManager {
    /// Open or create the segment store of the table at `table_dir`
    ///
    /// On startup:
    /// 1. Load the manifest (an absent manifest means an empty table)
    /// 2. Rebuild the schema registry from it
    /// 3. Delete `.tmp` files and segment files the manifest does not list
    /// 4. Open every listed segment, in manifest order
    pub fn open(table_dir: &Path, options: WriteOptions) -> Result<Self> {
        let segments_dir = table_dir.join(SEGMENTS_DIR);
        fs::create_dir_all(&segments_dir)?;

        let manifest_path = Manifest::path_in(table_dir);
        let stale_manifest = manifest_path.with_extension("tmp");
        if stale_manifest.exists() {
            warn!(path = %stale_manifest.display(), "Removing partial manifest");
            fs::remove_file(&stale_manifest)?;
        }
        let manifest = Manifest::load_if_exists(&manifest_path)?.unwrap_or_default();
        let registry = Arc::new(SchemaRegistry::from_snapshot(manifest.schema.clone())?);

        let live: HashSet<SegmentId> = manifest.segments.iter().copied().collect();
        let mut max_seen = manifest.segments.iter().copied().max().unwrap_or(0);

        for entry in fs::read_dir(&segments_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let is_tmp = path.extension().map_or(false, |ext| ext == "tmp");
            match Self::parse_segment_id(&path) {
                Some(id) if !is_tmp && live.contains(&id) => {}
                Some(id) => {
                    max_seen = max_seen.max(id);
                    warn!(path = %path.display(), "Removing unlisted segment file");
                    fs::remove_file(&path)?;
                }
                None if is_tmp => {
                    warn!(path = %path.display(), "Removing partial file");
                    fs::remove_file(&path)?;
                }
                None => {}
            }
        }

        let mut entries = Vec::with_capacity(manifest.segments.len());
        let mut unreadable = 0;
        for &id in &manifest.segments {
            let path = Self::segment_path_in(&segments_dir, id);
            match Segment::open(id, &path) {
                Ok(segment) => entries.push(SegmentEntry::Live(Arc::new(segment))),
                Err(e) => {
                    warn!(segment = id, error = %e, "Listed segment cannot be opened");
                    unreadable += 1;
                    entries.push(SegmentEntry::Unreadable(UnreadableSegment {
                        id,
                        path,
                        reason: e.to_string(),
                    }));
                }
            }
        }

        let next_id = manifest.next_segment_id.max(max_seen + 1).max(1);

        info!(
            dir = %table_dir.display(),
            segments = entries.len() - unreadable,
            unreadable,
            columns = registry.len(),
            "Opened segment store"
        );

        Ok(Self {
            segments_dir,
            manifest_path,
            registry,
            options,
            state: RwLock::new(ManagerState {
                entries,
                in_flight: None,
            }),
            next_segment_id: AtomicU64::new(next_id),
            publish_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
        })
    }

    /// Schema registry recovered from (and persisted with) the manifest
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn options(&self) -> WriteOptions {
        self.options
    }

    // =========================================================================
    // Writing segments
    // =========================================================================

    /// Encode `batch` into a new, not yet published segment
    pub fn write_segment(&self, batch: &ColumnarBatch) -> Result<SegmentHandle> {
        self.write_segment_with(batch, BufWriter::new)
    }

    /// Like [`write_segment`](Self::write_segment) with a custom sink around the file
    pub fn write_segment_with<S, F>(&self, batch: &ColumnarBatch, wrap: F) -> Result<SegmentHandle>
    where
        S: SegmentSink,
        F: FnOnce(fs::File) -> S,
    {
        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(id);

        let summary = write_segment_file(&path, &self.registry.snapshot(), batch, self.options, wrap)?;

        let segment = match Segment::open(id, &path) {
            Ok(segment) => segment,
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&path) {
                    warn!(
                        path = %path.display(),
                        error = %remove_err,
                        "Failed to remove unreadable new segment"
                    );
                }
                return Err(e);
            }
        };

        debug!(
            segment = id,
            rows = summary.row_count,
            columns = summary.column_count,
            bytes = summary.file_size,
            "Wrote segment"
        );
        Ok(Arc::new(segment))
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Append `handle` to the live list and persist the manifest
    ///
    /// If the manifest cannot be written the list is unchanged and the
    /// segment is retired.
    pub fn register(&self, handle: SegmentHandle) -> Result<()> {
        self.append_live(handle, false)
    }

    /// Remember the batch being flushed so reads keep seeing its rows
    pub fn stage_flush(&self, batch: Arc<ColumnarBatch>) {
        self.state.write().in_flight = Some(batch);
    }

    /// Batch staged by a flush that has not been published
    pub fn staged(&self) -> Option<Arc<ColumnarBatch>> {
        self.state.read().in_flight.clone()
    }

    /// Register the flushed segment and drop the staged batch in one step
    pub fn publish_flush(&self, handle: SegmentHandle) -> Result<()> {
        self.append_live(handle, true)
    }

    fn append_live(&self, handle: SegmentHandle, clear_in_flight: bool) -> Result<()> {
        let _publish = self.publish_lock.lock();

        let mut next = self.state.read().entries.clone();
        next.push(SegmentEntry::Live(Arc::clone(&handle)));

        if let Err(e) = self.store_manifest(&next) {
            handle.retire();
            return Err(e);
        }

        let mut state = self.state.write();
        state.entries = next;
        if clear_in_flight {
            state.in_flight = None;
        }
        Ok(())
    }

    /// Rewrite the manifest with the current list and registry
    pub fn persist_schema(&self) -> Result<()> {
        let _publish = self.publish_lock.lock();
        let current = self.state.read().entries.clone();
        self.store_manifest(&current)
    }

    fn store_manifest(&self, entries: &[SegmentEntry]) -> Result<()> {
        let manifest = Manifest {
            next_segment_id: self.next_segment_id.load(Ordering::SeqCst),
            segments: entries.iter().map(SegmentEntry::id).collect(),
            schema: self.registry.snapshot(),
        };
        manifest.store(&self.manifest_path, self.options.sync)
    }

    // =========================================================================
    // Reading the list
    // =========================================================================

    /// Live segments, oldest rows first
    pub fn list(&self) -> Vec<SegmentHandle> {
        self.state.read().live().cloned().collect()
    }

    /// Live segments split at every unreadable entry
    ///
    /// Each run is contiguous in table order, so any sub-run of one is a
    /// valid compaction input.
    pub fn runs(&self) -> Vec<Vec<SegmentHandle>> {
        let state = self.state.read();
        let mut runs = vec![Vec::new()];
        for entry in &state.entries {
            match entry {
                SegmentEntry::Live(segment) => {
                    if let Some(run) = runs.last_mut() {
                        run.push(Arc::clone(segment));
                    }
                }
                SegmentEntry::Unreadable(_) => runs.push(Vec::new()),
            }
        }
        runs.retain(|run| !run.is_empty());
        runs
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let state = self.state.read();
        TableSnapshot {
            entries: state.entries.clone(),
            in_flight: state.in_flight.clone(),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.state.read().live().count()
    }

    /// Rows across live segments
    pub fn total_rows(&self) -> u64 {
        self.state.read().live().map(|s| s.row_count()).sum()
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Merge a contiguous run of live segments into one
    ///
    /// The run may not span an unreadable entry. The merged segment replaces
    /// the run at the run's position, so rows keep their order. Inputs are retired: they stay readable through
    /// handles that are still held and their files are deleted afterwards.
    /// On any failure the live list is unchanged.
    pub fn compact(&self, candidates: &[SegmentHandle]) -> Result<SegmentHandle> {
        let _compaction = self.compaction_lock.lock();

        Self::locate_run(&self.state.read().entries.clone(), candidates)?;

        let mut merged = ColumnarBatch::new(0);
        for segment in candidates {
            merged.append(&segment.read_all()?);
        }
        let output = self.write_segment(&merged)?;

        {
            let _publish = self.publish_lock.lock();
            let mut next = self.state.read().entries.clone();

            let start = match Self::locate_run(&next, candidates) {
                Ok(start) => start,
                Err(e) => {
                    output.retire();
                    return Err(e);
                }
            };
            next.splice(
                start..start + candidates.len(),
                iter::once(SegmentEntry::Live(Arc::clone(&output))),
            );

            if let Err(e) = self.store_manifest(&next) {
                output.retire();
                return Err(e);
            }
            self.state.write().entries = next;
        }

        for segment in candidates {
            segment.retire();
        }

        info!(
            inputs = ?candidates.iter().map(|s| s.id()).collect::<Vec<_>>(),
            output = output.id(),
            rows = output.row_count(),
            "Compacted segments"
        );
        Ok(output)
    }

    /// Start index of `candidates` within `entries`, if they form a contiguous live run
    fn locate_run(entries: &[SegmentEntry], candidates: &[SegmentHandle]) -> Result<usize> {
        let first = candidates
            .first()
            .ok_or_else(|| DistribuitoError::InvalidCompaction("no segments given".to_string()))?;

        let start = entries
            .iter()
            .position(|entry| entry.as_live().map_or(false, |s| Arc::ptr_eq(s, first)))
            .ok_or_else(|| {
                DistribuitoError::InvalidCompaction(format!("segment {} is not live", first.id()))
            })?;

        let run = entries.get(start..start + candidates.len()).ok_or_else(|| {
            DistribuitoError::InvalidCompaction(
                "candidates run past the end of the live list".to_string(),
            )
        })?;
        for (entry, given) in run.iter().zip(candidates) {
            match entry {
                SegmentEntry::Live(expected) if Arc::ptr_eq(expected, given) => {}
                SegmentEntry::Live(_) => {
                    return Err(DistribuitoError::InvalidCompaction(format!(
                        "segment {} does not follow its predecessor in the live list",
                        given.id()
                    )))
                }
                SegmentEntry::Unreadable(broken) => {
                    return Err(DistribuitoError::InvalidCompaction(format!(
                        "unreadable segment {} sits inside the run",
                        broken.id
                    )))
                }
            }
        }
        Ok(start)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        Self::segment_path_in(&self.segments_dir, id)
    }

    fn segment_path_in(dir: &Path, id: SegmentId) -> PathBuf {
        dir.join(format!("seg_{:08}.dsto", id))
    }

    /// Parse the id from `seg_00000042.dsto` (or its `.tmp` sibling)
    fn parse_segment_id(path: &Path) -> Option<SegmentId> {
        let name = path.file_name()?.to_str()?;
        let name = name.strip_suffix(".tmp").unwrap_or(name);
        name.strip_prefix("seg_")?
            .strip_suffix(".dsto")?
            .parse()
            .ok()
    }

    pub fn segments_dir(&self) -> &Path {
        &self.segments_dir
    }
}
