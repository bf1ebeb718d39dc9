//! Segment Format Tests
//!
//! Tests verify:
//! - Batches written to a segment read back exactly
//! - Footer statistics are available without block I/O
//! - Reading one column touches only that column's block
//! - Corruption in the trailer, footer or a block is reported, never hidden
//! - File writes are atomic: a failed write leaves no file behind

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use distribuito::codec::{Codec, Compression, EncodingPolicy};
use distribuito::schema::{ColumnId, SchemaRegistry, SchemaSnapshot};
use distribuito::storage::segment::{write_segment_file, SegmentSink, FORMAT_VERSION};
use distribuito::storage::{Segment, SegmentReader, SegmentWriter, WriteOptions};
use distribuito::{ColumnarBatch, DistribuitoError, Value, ValueType};

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    schema: SchemaSnapshot,
    id: ColumnId,
    name: ColumnId,
    score: ColumnId,
    batch: ColumnarBatch,
}

fn fixture() -> Fixture {
    let registry = SchemaRegistry::new();
    let id = registry.register_or_get("id", ValueType::Int64).unwrap();
    let name = registry.register_or_get("name", ValueType::String).unwrap();
    let score = registry.register_or_get("score", ValueType::Float64).unwrap();
    // Registered but never written
    registry.register_or_get("unused", ValueType::Boolean).unwrap();

    let rows = 100;
    let batch = ColumnarBatch::from_columns(
        rows,
        [
            (id, (0..rows as i64).map(Value::Int64).collect()),
            (
                name,
                (0..rows)
                    .map(|i| if i % 4 == 0 { Value::Null } else { Value::from(format!("n{}", i % 5)) })
                    .collect(),
            ),
            (score, (0..rows).map(|i| Value::Float64(i as f64 / 2.0)).collect()),
        ],
    )
    .unwrap();

    Fixture {
        schema: registry.snapshot(),
        id,
        name,
        score,
        batch,
    }
}

fn options() -> WriteOptions {
    WriteOptions {
        sync: false,
        ..Default::default()
    }
}

fn encode(fx: &Fixture, options: WriteOptions) -> Vec<u8> {
    let mut writer = SegmentWriter::new(Vec::new(), options);
    writer.write_segment(&fx.schema, &fx.batch).unwrap();
    writer.into_inner()
}

fn open_bytes(bytes: Vec<u8>) -> distribuito::Result<SegmentReader<Cursor<Vec<u8>>>> {
    SegmentReader::from_source(Cursor::new(bytes), "memory")
}

/// Seekable source recording every `(offset, len)` read
struct TrackingSource {
    inner: Cursor<Vec<u8>>,
    reads: Arc<Mutex<Vec<(u64, usize)>>>,
}

impl Read for TrackingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let offset = self.inner.position();
        let n = self.inner.read(buf)?;
        self.reads.lock().push((offset, n));
        Ok(n)
    }
}

impl Seek for TrackingSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Sink that fails once `budget` bytes have been written
struct FailingSink {
    file: File,
    budget: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.budget {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
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

fn assert_corrupt<T>(result: distribuito::Result<T>) {
    match result {
        Err(DistribuitoError::CorruptSegment { .. }) => {}
        Err(other) => panic!("expected CorruptSegment, got {:?}", other),
        Ok(_) => panic!("expected CorruptSegment, got Ok"),
    }
}

// =============================================================================
// Write / Read Tests
// =============================================================================

#[test]
fn test_write_then_read_all_columns() {
    let fx = fixture();
    for encoding in [EncodingPolicy::Plain, EncodingPolicy::Compact] {
        for compression in [Compression::None, Compression::Lz4] {
            let bytes = encode(
                &fx,
                WriteOptions {
                    encoding,
                    compression,
                    sync: false,
                },
            );
            let reader = open_bytes(bytes).unwrap();

            assert_eq!(reader.row_count(), 100);
            assert_eq!(reader.column_ids(), vec![fx.id, fx.name, fx.score]);
            let batch = reader.read_columns(&[fx.id, fx.name, fx.score]).unwrap();
            assert_eq!(batch, fx.batch);
        }
    }
}

#[test]
fn test_summary_matches_bytes() {
    let fx = fixture();
    let mut writer = SegmentWriter::new(Vec::new(), options());

    let summary = writer.write_segment(&fx.schema, &fx.batch).unwrap();
    let bytes = writer.into_inner();

    assert_eq!(summary.file_size, bytes.len() as u64);
    assert_eq!(summary.row_count, 100);
    assert_eq!(summary.column_count, 3);

    let reader = open_bytes(bytes).unwrap();
    assert_eq!(reader.footer(), &summary.footer);
}

#[test]
fn test_trailer_layout() {
    let fx = fixture();
    let bytes = encode(&fx, options());

    let trailer = &bytes[bytes.len() - 26..];
    assert_eq!(&trailer[0..8], b"DSTOSEG\x01");
    assert_eq!(u16::from_le_bytes([trailer[8], trailer[9]]), FORMAT_VERSION);
}

#[test]
fn test_codecs_recorded_in_footer() {
    let fx = fixture();
    let reader = open_bytes(encode(&fx, options())).unwrap();

    let entries = &reader.footer().entries;
    // Sequential ids delta-encode smaller than plain
    assert_eq!(entries[&fx.id].codec, Codec::DeltaInt64);
    assert_eq!(entries[&fx.score].codec, Codec::PlainFloat64);
    assert_eq!(entries[&fx.id].compression, Compression::Lz4);
}

#[test]
fn test_absent_column_reads_as_nulls() {
    let fx = fixture();
    let reader = open_bytes(encode(&fx, options())).unwrap();
    let unused = ColumnId(3);

    assert!(!reader.contains(unused));
    assert_eq!(reader.read_column(unused).unwrap(), vec![Value::Null; 100]);

    let stats = reader.stats(unused);
    assert!(stats.is_all_null());
    assert_eq!(stats.min, None);
    assert_eq!(stats.max, None);
}

#[test]
fn test_footer_statistics() {
    let fx = fixture();
    let reader = open_bytes(encode(&fx, options())).unwrap();

    let id_stats = reader.stats(fx.id);
    assert_eq!(id_stats.min, Some(Value::Int64(0)));
    assert_eq!(id_stats.max, Some(Value::Int64(99)));
    assert_eq!(id_stats.null_count, 0);

    let name_stats = reader.stats(fx.name);
    assert_eq!(name_stats.null_count, 25);
    assert_eq!(name_stats.min, Some(Value::from("n0")));
    assert_eq!(name_stats.max, Some(Value::from("n4")));
}

#[test]
fn test_empty_batch_segment() {
    let registry = SchemaRegistry::new();
    let batch = ColumnarBatch::new(0);
    let mut writer = SegmentWriter::new(Vec::new(), options());
    writer.write_segment(&registry.snapshot(), &batch).unwrap();

    let reader = open_bytes(writer.into_inner()).unwrap();

    assert_eq!(reader.row_count(), 0);
    assert!(reader.column_ids().is_empty());
}

#[test]
fn test_unknown_column_rejected_before_writing() {
    let fx = fixture();
    let mut batch = fx.batch.clone();
    batch
        .insert_column(ColumnId(42), vec![Value::Int64(1); 100])
        .unwrap();
    let mut writer = SegmentWriter::new(Vec::new(), options());

    let err = writer.write_segment(&fx.schema, &batch).unwrap_err();

    assert!(matches!(err, DistribuitoError::UnknownColumnId(42)));
    assert_eq!(writer.position(), 0);
}

// =============================================================================
// Column Pruning I/O Tests
// =============================================================================

#[test]
fn test_reading_one_column_touches_only_its_block() {
    let fx = fixture();
    let reads = Arc::new(Mutex::new(Vec::new()));
    let source = TrackingSource {
        inner: Cursor::new(encode(&fx, options())),
        reads: Arc::clone(&reads),
    };
    let reader = SegmentReader::from_source(source, "tracked").unwrap();
    let entry = reader.footer().entries[&fx.score].clone();
    reads.lock().clear();

    let values = reader.read_column(fx.score).unwrap();

    assert_eq!(values, fx.batch.column(fx.score).unwrap());
    let log = reads.lock();
    assert!(!log.is_empty());
    for &(offset, len) in log.iter() {
        assert!(offset >= entry.offset, "read at {} before block", offset);
        assert!(
            offset + len as u64 <= entry.offset + entry.length,
            "read at {}+{} past block",
            offset,
            len
        );
    }
}

#[test]
fn test_stats_need_no_io() {
    let fx = fixture();
    let reads = Arc::new(Mutex::new(Vec::new()));
    let source = TrackingSource {
        inner: Cursor::new(encode(&fx, options())),
        reads: Arc::clone(&reads),
    };
    let reader = SegmentReader::from_source(source, "tracked").unwrap();
    reads.lock().clear();

    let _ = reader.stats(fx.id);
    let _ = reader.stats(fx.name);

    assert!(reads.lock().is_empty());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_bad_magic() {
    let fx = fixture();
    let mut bytes = encode(&fx, options());
    let at = bytes.len() - 26;
    bytes[at] ^= 0xFF;

    assert_corrupt(open_bytes(bytes));
}

#[test]
fn test_unsupported_version() {
    let fx = fixture();
    let mut bytes = encode(&fx, options());
    let at = bytes.len() - 18;
    bytes[at..at + 2].copy_from_slice(&99u16.to_le_bytes());

    assert_corrupt(open_bytes(bytes));
}

#[test]
fn test_truncated_file() {
    let fx = fixture();
    let mut bytes = encode(&fx, options());
    bytes.truncate(bytes.len() - 1);

    assert_corrupt(open_bytes(bytes));
}

#[test]
fn test_tiny_file() {
    assert_corrupt(open_bytes(vec![0u8; 10]));
}

#[test]
fn test_footer_corruption_detected() {
    let fx = fixture();
    let mut bytes = encode(&fx, options());
    let footer_offset = {
        let reader = open_bytes(bytes.clone()).unwrap();
        reader.footer().entries.values().map(|e| e.offset + e.length).max().unwrap()
    };
    bytes[footer_offset as usize + 2] ^= 0x01;

    assert_corrupt(open_bytes(bytes));
}

#[test]
fn test_block_corruption_detected_on_read() {
    let fx = fixture();
    let mut bytes = encode(&fx, options());
    let (name_block, id_block) = {
        let reader = open_bytes(bytes.clone()).unwrap();
        let entries = &reader.footer().entries;
        (entries[&fx.name].clone(), entries[&fx.id].clone())
    };
    bytes[name_block.offset as usize + name_block.length as usize - 1] ^= 0x5A;

    // Footer is intact, so the segment still opens
    let reader = open_bytes(bytes).unwrap();

    assert_corrupt(reader.read_column(fx.name));
    // Other columns are unaffected
    assert_eq!(
        reader.read_column(fx.id).unwrap(),
        fx.batch.column(fx.id).unwrap()
    );
    assert!(id_block.offset != name_block.offset);
}

// =============================================================================
// File Tests
// =============================================================================

#[test]
fn test_write_segment_file_and_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seg_00000001.dsto");
    let fx = fixture();

    let summary =
        write_segment_file(&path, &fx.schema, &fx.batch, WriteOptions::default(), |f| f).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), summary.file_size);
    assert!(!dir.path().join("seg_00000001.dsto.tmp").exists());

    let segment = Segment::open(1, &path).unwrap();
    assert_eq!(segment.id(), 1);
    assert_eq!(segment.read_all().unwrap(), fx.batch);
    assert_eq!(segment.segment_stats().column(fx.id).max, Some(Value::Int64(99)));
}

#[test]
fn test_failed_write_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seg_00000002.dsto");
    let fx = fixture();

    let result = write_segment_file(&path, &fx.schema, &fx.batch, options(), |file| FailingSink {
        file,
        budget: 64,
    });

    assert!(matches!(result, Err(DistribuitoError::Io(_))));
    assert!(!path.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_live_segment_file_survives_drop() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seg_00000003.dsto");
    let fx = fixture();
    write_segment_file(&path, &fx.schema, &fx.batch, options(), |f| f).unwrap();

    // Not retired: dropping keeps the file
    drop(Segment::open(3, &path).unwrap());
    assert!(path.exists());
}
