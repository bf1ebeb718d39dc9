//! MemTable Tests
//!
//! Tests verify:
//! - Column-major accumulation with null back-fill
//! - Type conflicts leave the buffer and the registry untouched
//! - Row and byte flush thresholds
//! - take_and_reset hands off the whole buffer
//! - Concurrent appends

use std::sync::Arc;
use std::thread;

use distribuito::memtable::{FlushThresholds, MemTable};
use distribuito::schema::{ColumnId, SchemaRegistry};
use distribuito::{DistribuitoError, Row, Value, ValueType};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_memtable(thresholds: FlushThresholds) -> (Arc<SchemaRegistry>, MemTable) {
    let registry = Arc::new(SchemaRegistry::new());
    let memtable = MemTable::new(Arc::clone(&registry), thresholds);
    (registry, memtable)
}

fn default_memtable() -> (Arc<SchemaRegistry>, MemTable) {
    setup_memtable(FlushThresholds::default())
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let (_, memtable) = default_memtable();

    assert!(memtable.is_empty());
    assert_eq!(memtable.row_count(), 0);
    assert_eq!(memtable.approx_bytes(), 0);
    assert!(!memtable.should_flush());
}

#[test]
fn test_append_registers_columns() {
    let (registry, memtable) = default_memtable();

    let count = memtable
        .append(&Row::new().with("a", 1i64).with("b", "x"))
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(registry.len(), 2);
    assert!(registry.id_of("a").is_some());
    assert!(registry.id_of("b").is_some());
}

#[test]
fn test_late_column_is_back_filled() {
    let (registry, memtable) = default_memtable();

    memtable.append(&Row::new().with("a", 1i64)).unwrap();
    memtable.append(&Row::new().with("a", 2i64)).unwrap();
    memtable.append(&Row::new().with("b", true)).unwrap();

    let batch = memtable.take_and_reset();
    let a = registry.id_of("a").unwrap();
    let b = registry.id_of("b").unwrap();

    assert_eq!(batch.row_count(), 3);
    assert_eq!(
        batch.column(a).unwrap(),
        &[Value::Int64(1), Value::Int64(2), Value::Null]
    );
    assert_eq!(
        batch.column(b).unwrap(),
        &[Value::Null, Value::Null, Value::Boolean(true)]
    );
}

#[test]
fn test_explicit_null_does_not_register_column() {
    let (registry, memtable) = default_memtable();

    memtable
        .append(&Row::new().with("a", 1i64).with("ghost", Value::Null))
        .unwrap();

    assert_eq!(registry.id_of("ghost"), None);
    assert_eq!(memtable.take_and_reset().column_count(), 1);
}

#[test]
fn test_empty_row_counts() {
    let (_, memtable) = default_memtable();

    memtable.append(&Row::new()).unwrap();
    memtable.append(&Row::new().with("a", 1.5)).unwrap();

    let batch = memtable.take_and_reset();
    assert_eq!(batch.row_count(), 2);
    assert_eq!(
        batch.column(ColumnId(0)).unwrap(),
        &[Value::Null, Value::Float64(1.5)]
    );
}

// =============================================================================
// Type Conflict Tests
// =============================================================================

#[test]
fn test_conflict_with_registered_type() {
    let (registry, memtable) = default_memtable();
    memtable.append(&Row::new().with("a", 1i64)).unwrap();
    let bytes_before = memtable.approx_bytes();

    let err = memtable
        .append_rows(&[
            Row::new().with("a", 2i64).with("fresh", "new"),
            Row::new().with("a", "oops"),
        ])
        .unwrap_err();

    assert!(matches!(err, DistribuitoError::SchemaTypeConflict { .. }));
    assert_eq!(memtable.row_count(), 1);
    assert_eq!(memtable.approx_bytes(), bytes_before);
    // Nothing from the rejected rows was registered
    assert_eq!(registry.id_of("fresh"), None);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_conflict_within_one_batch() {
    let (registry, memtable) = default_memtable();

    let err = memtable
        .append_rows(&[Row::new().with("x", 1i64), Row::new().with("x", false)])
        .unwrap_err();

    match err {
        DistribuitoError::SchemaTypeConflict {
            column,
            existing,
            attempted,
        } => {
            assert_eq!(column, "x");
            assert_eq!(existing, ValueType::Int64);
            assert_eq!(attempted, ValueType::Boolean);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(registry.is_empty());
    assert!(memtable.is_empty());
}

// =============================================================================
// Threshold Tests
// =============================================================================

#[test]
fn test_row_threshold() {
    let (_, memtable) = setup_memtable(FlushThresholds {
        max_rows: 3,
        max_bytes: usize::MAX,
    });

    memtable.append(&Row::new().with("a", 1i64)).unwrap();
    memtable.append(&Row::new().with("a", 2i64)).unwrap();
    assert!(!memtable.should_flush());

    memtable.append(&Row::new().with("a", 3i64)).unwrap();
    assert!(memtable.should_flush());
}

#[test]
fn test_byte_threshold() {
    let (_, memtable) = setup_memtable(FlushThresholds {
        max_rows: usize::MAX,
        max_bytes: 1024,
    });

    memtable
        .append(&Row::new().with("s", "x".repeat(2048)))
        .unwrap();

    assert!(memtable.approx_bytes() >= 2048);
    assert!(memtable.should_flush());
}

#[test]
fn test_take_and_reset_empties_buffer() {
    let (registry, memtable) = setup_memtable(FlushThresholds {
        max_rows: 2,
        max_bytes: usize::MAX,
    });
    memtable.append(&Row::new().with("a", 1i64)).unwrap();
    memtable.append(&Row::new().with("a", 2i64)).unwrap();

    let batch = memtable.take_and_reset();

    assert_eq!(batch.row_count(), 2);
    assert!(memtable.is_empty());
    assert_eq!(memtable.approx_bytes(), 0);
    assert!(!memtable.should_flush());
    // The schema outlives the buffer
    assert_eq!(registry.len(), 1);

    // Columns registered earlier are not materialized in the new buffer
    memtable.append(&Row::new().with("b", "y")).unwrap();
    let next = memtable.take_and_reset();
    assert_eq!(next.column(registry.id_of("a").unwrap()), None);
    assert_eq!(next.row_count(), 1);
}

#[test]
fn test_take_from_empty_buffer() {
    let (_, memtable) = default_memtable();

    let batch = memtable.take_and_reset();

    assert!(batch.is_empty());
    assert_eq!(batch.column_count(), 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_appends() {
    let (registry, memtable) = default_memtable();
    let memtable = Arc::new(memtable);
    let mut handles = vec![];

    for t in 0..4i64 {
        let memtable = Arc::clone(&memtable);
        handles.push(thread::spawn(move || {
            for i in 0..250i64 {
                let row = Row::new()
                    .with("writer", t)
                    .with("seq", i)
                    .with(format!("only_{}", t), true);
                memtable.append(&row).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let batch = memtable.take_and_reset();
    assert_eq!(batch.row_count(), 1000);
    assert_eq!(registry.len(), 6);
    for (_, values) in batch.columns() {
        assert_eq!(values.len(), 1000);
    }

    // Each writer's rows keep their relative order
    let writer = batch.column(registry.id_of("writer").unwrap()).unwrap();
    let seq = batch.column(registry.id_of("seq").unwrap()).unwrap();
    for t in 0..4i64 {
        let mine: Vec<&Value> = writer
            .iter()
            .zip(seq)
            .filter(|(w, _)| **w == Value::Int64(t))
            .map(|(_, s)| s)
            .collect();
        let expected: Vec<Value> = (0..250i64).map(Value::Int64).collect();
        assert_eq!(mine.into_iter().cloned().collect::<Vec<_>>(), expected);
    }
}
