//! Tests for SegmentManager
//!
//! These tests verify:
//! - Opening/creating a table's segment store
//! - Writing and registering segments
//! - Persistence (restart restores the same ordered list and schema)
//! - Cleanup of orphaned and partially written files
//! - Failed writes publish nothing
//! - Listed segments that cannot be opened are reported, not dropped, and
//!   keep their place in the segment order

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use distribuito::storage::segment::SegmentSink;
use distribuito::storage::{
    Manifest, SegmentEntry, SegmentManager, WriteOptions, MANIFEST_FILE, SEGMENTS_DIR,
};
use distribuito::{ColumnarBatch, DistribuitoError, Value, ValueType};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_table() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("events");
    (temp_dir, path)
}

fn options() -> WriteOptions {
    WriteOptions {
        sync: false,
        ..Default::default()
    }
}

/// Batch of `values` in the int64 column "v", registering it if needed
fn int_batch(manager: &SegmentManager, values: &[i64]) -> ColumnarBatch {
    let id = manager
        .registry()
        .register_or_get("v", ValueType::Int64)
        .unwrap();
    ColumnarBatch::from_columns(
        values.len(),
        [(id, values.iter().copied().map(Value::Int64).collect())],
    )
    .unwrap()
}

fn write_and_register(manager: &SegmentManager, values: &[i64]) -> u64 {
    let batch = int_batch(manager, values);
    let handle = manager.write_segment(&batch).unwrap();
    let id = handle.id();
    manager.register(handle).unwrap();
    id
}

fn read_v(manager: &SegmentManager) -> Vec<Value> {
    let id = manager.registry().id_of("v").unwrap();
    manager
        .list()
        .iter()
        .flat_map(|s| s.read_column(id).unwrap())
        .collect()
}

fn segment_files(table_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(table_dir.join(SEGMENTS_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Sink that fails after `budget` bytes
struct FailingSink {
    file: File,
    budget: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.budget {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.budget -= buf.len();
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl SegmentSink for FailingSink {
    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_open_creates_directories() {
    let (_temp, path) = setup_temp_table();
    assert!(!path.exists());

    let manager = SegmentManager::open(&path, options()).unwrap();

    assert!(path.join(SEGMENTS_DIR).is_dir());
    assert_eq!(manager.segment_count(), 0);
    assert!(manager.registry().is_empty());
    // No manifest until something is published
    assert!(!path.join(MANIFEST_FILE).exists());
}

#[test]
fn test_write_and_register() {
    let (_temp, path) = setup_temp_table();
    let manager = SegmentManager::open(&path, options()).unwrap();

    let first = write_and_register(&manager, &[1, 2, 3]);
    let second = write_and_register(&manager, &[4, 5]);

    assert!(second > first);
    assert_eq!(manager.segment_count(), 2);
    assert_eq!(manager.total_rows(), 5);
    assert_eq!(
        read_v(&manager),
        (1..=5).map(Value::Int64).collect::<Vec<_>>()
    );
    assert!(manager.segment_path(first).exists());
}

#[test]
fn test_unregistered_segment_is_invisible() {
    let (_temp, path) = setup_temp_table();
    let manager = SegmentManager::open(&path, options()).unwrap();

    let batch = int_batch(&manager, &[7]);
    let handle = manager.write_segment(&batch).unwrap();

    assert_eq!(manager.segment_count(), 0);
    assert!(handle.path().exists());
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_restart_restores_order_and_schema() {
    let (_temp, path) = setup_temp_table();
    let ids = {
        let manager = SegmentManager::open(&path, options()).unwrap();
        manager
            .registry()
            .register_or_get("label", ValueType::String)
            .unwrap();
        vec![
            write_and_register(&manager, &[10]),
            write_and_register(&manager, &[20, 21]),
            write_and_register(&manager, &[30]),
        ]
    };

    let manager = SegmentManager::open(&path, options()).unwrap();

    let reopened: Vec<u64> = manager.list().iter().map(|s| s.id()).collect();
    assert_eq!(reopened, ids);
    assert_eq!(
        read_v(&manager),
        vec![
            Value::Int64(10),
            Value::Int64(20),
            Value::Int64(21),
            Value::Int64(30)
        ]
    );
    let schema = manager.registry().snapshot();
    assert_eq!(schema.id_of("label").map(|id| id.0), Some(0));
    assert_eq!(schema.value_type(schema.id_of("v").unwrap()), Some(ValueType::Int64));
}

#[test]
fn test_ids_never_reused_after_restart() {
    let (_temp, path) = setup_temp_table();
    let last = {
        let manager = SegmentManager::open(&path, options()).unwrap();
        write_and_register(&manager, &[1]);
        write_and_register(&manager, &[2])
    };

    let manager = SegmentManager::open(&path, options()).unwrap();
    let next = write_and_register(&manager, &[3]);

    assert!(next > last);
}

#[test]
fn test_persist_schema_without_segments() {
    let (_temp, path) = setup_temp_table();
    {
        let manager = SegmentManager::open(&path, options()).unwrap();
        manager
            .registry()
            .register_or_get("declared", ValueType::Timestamp)
            .unwrap();
        manager.persist_schema().unwrap();
    }

    let manifest = Manifest::load(&path.join(MANIFEST_FILE)).unwrap();
    assert!(manifest.segments.is_empty());
    assert_eq!(manifest.schema.len(), 1);

    let manager = SegmentManager::open(&path, options()).unwrap();
    assert_eq!(
        manager.registry().check("declared", ValueType::Timestamp).unwrap().map(|id| id.0),
        Some(0)
    );
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[test]
fn test_open_removes_orphans_and_partials() {
    let (_temp, path) = setup_temp_table();
    let (live, orphan) = {
        let manager = SegmentManager::open(&path, options()).unwrap();
        let live = write_and_register(&manager, &[1]);
        // Written but never registered
        let batch = int_batch(&manager, &[2]);
        let orphan = manager.write_segment(&batch).unwrap().id();
        (live, orphan)
    };
    let segments = path.join(SEGMENTS_DIR);
    fs::write(segments.join("seg_00000099.dsto.tmp"), b"partial").unwrap();
    fs::write(path.join("MANIFEST.tmp"), b"partial").unwrap();
    fs::write(segments.join("notes.txt"), b"keep me").unwrap();

    let manager = SegmentManager::open(&path, options()).unwrap();

    assert_eq!(manager.list().len(), 1);
    assert_eq!(manager.list()[0].id(), live);
    assert!(!manager.segment_path(orphan).exists());
    assert!(!path.join("MANIFEST.tmp").exists());
    assert_eq!(
        segment_files(&path),
        vec!["notes.txt".to_string(), format!("seg_{:08}.dsto", live)]
    );

    // The orphan's id is not handed out again
    let next = write_and_register(&manager, &[3]);
    assert!(next > 99);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_write_publishes_nothing() {
    let (_temp, path) = setup_temp_table();
    let manager = SegmentManager::open(&path, options()).unwrap();
    write_and_register(&manager, &[1, 2]);
    let batch = int_batch(&manager, &(0..500).collect::<Vec<_>>());

    let result = manager.write_segment_with(&batch, |file| FailingSink { file, budget: 100 });

    assert!(matches!(result, Err(DistribuitoError::Io(_))));
    assert_eq!(manager.segment_count(), 1);
    assert_eq!(segment_files(&path).len(), 1);

    // A later write still works
    write_and_register(&manager, &[3]);
    assert_eq!(manager.total_rows(), 3);
}

#[test]
fn test_corrupt_manifest_fails_open() {
    let (_temp, path) = setup_temp_table();
    {
        let manager = SegmentManager::open(&path, options()).unwrap();
        write_and_register(&manager, &[1]);
    }
    let manifest_path = path.join(MANIFEST_FILE);
    let mut bytes = fs::read(&manifest_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&manifest_path, bytes).unwrap();

    let result = SegmentManager::open(&path, options());

    assert!(matches!(result, Err(DistribuitoError::CorruptManifest { .. })));
    assert!(result.err().map_or(false, |e| e.is_corruption()));
}

#[test]
fn test_unreadable_segment_reported_and_kept() {
    let (_temp, path) = setup_temp_table();
    let (bad, good) = {
        let manager = SegmentManager::open(&path, options()).unwrap();
        let bad = write_and_register(&manager, &[1, 2]);
        let good = write_and_register(&manager, &[3]);
        (bad, good)
    };
    let bad_path = path.join(SEGMENTS_DIR).join(format!("seg_{:08}.dsto", bad));
    let file = OpenOptions::new().write(true).open(&bad_path).unwrap();
    file.set_len(10).unwrap();
    drop(file);

    let manager = SegmentManager::open(&path, options()).unwrap();

    let snapshot = manager.snapshot();
    let segments = snapshot.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].id(), good);
    let unreadable = snapshot.unreadable();
    assert_eq!(unreadable.len(), 1);
    assert_eq!(unreadable[0].id, bad);
    assert_eq!(unreadable[0].path, bad_path);
    assert!(matches!(snapshot.entries[0], SegmentEntry::Unreadable(_)));
    // The damaged file is left for inspection
    assert!(bad_path.exists());

    // Publishing keeps the unreadable id in its slot
    let newest = write_and_register(&manager, &[4]);
    drop(manager);
    let manifest = Manifest::load(&path.join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.segments, vec![bad, good, newest]);
    let manager = SegmentManager::open(&path, options()).unwrap();
    assert_eq!(manager.snapshot().unreadable().len(), 1);
    assert_eq!(manager.segment_count(), 2);
}

#[test]
fn test_repaired_segment_returns_in_its_slot() {
    let (_temp, path) = setup_temp_table();
    let middle = {
        let manager = SegmentManager::open(&path, options()).unwrap();
        write_and_register(&manager, &[1]);
        let middle = write_and_register(&manager, &[2]);
        write_and_register(&manager, &[3]);
        middle
    };
    let middle_path = path.join(SEGMENTS_DIR).join(format!("seg_{:08}.dsto", middle));
    let original = fs::read(&middle_path).unwrap();
    fs::write(&middle_path, b"garbled").unwrap();

    {
        let manager = SegmentManager::open(&path, options()).unwrap();
        assert_eq!(manager.runs().len(), 2);
        write_and_register(&manager, &[4]);
    }
    fs::write(&middle_path, original).unwrap();

    let manager = SegmentManager::open(&path, options()).unwrap();

    assert!(manager.snapshot().unreadable().is_empty());
    assert_eq!(manager.runs().len(), 1);
    assert_eq!(read_v(&manager), (1..=4).map(Value::Int64).collect::<Vec<_>>());
}

#[test]
fn test_compaction_never_spans_unreadable_segment() {
    let (_temp, path) = setup_temp_table();
    let middle = {
        let manager = SegmentManager::open(&path, options()).unwrap();
        write_and_register(&manager, &[1]);
        let middle = write_and_register(&manager, &[2]);
        write_and_register(&manager, &[3]);
        middle
    };
    let middle_path = path.join(SEGMENTS_DIR).join(format!("seg_{:08}.dsto", middle));
    fs::write(&middle_path, b"garbled").unwrap();
    let manager = SegmentManager::open(&path, options()).unwrap();
    let live = manager.list();
    assert_eq!(live.len(), 2);

    let result = manager.compact(&live);

    assert!(matches!(result, Err(DistribuitoError::InvalidCompaction(_))));
    assert_eq!(manager.list().len(), 2);
    assert!(live.iter().all(|s| !s.is_retired()));
}

// =============================================================================
// Flush Staging Tests
// =============================================================================

#[test]
fn test_stage_and_publish_flush() {
    let (_temp, path) = setup_temp_table();
    let manager = SegmentManager::open(&path, options()).unwrap();
    let batch = Arc::new(int_batch(&manager, &[5, 6]));

    manager.stage_flush(Arc::clone(&batch));
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.in_flight.as_deref(), Some(&*batch));
    assert!(snapshot.entries.is_empty());

    let handle = manager.write_segment(&batch).unwrap();
    manager.publish_flush(handle).unwrap();

    let snapshot = manager.snapshot();
    assert!(snapshot.in_flight.is_none());
    assert!(manager.staged().is_none());
    assert_eq!(snapshot.segments().len(), 1);
}
