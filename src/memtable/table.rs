//! MemTable implementation
//!
//! Column-major accumulator guarded by a single mutex.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::batch::{ColumnarBatch, Row};
use crate::error::{DistribuitoError, Result};
use crate::schema::{ColumnId, SchemaRegistry, Value, ValueType};

/// Per-row bookkeeping overhead counted toward `approx_bytes`
const ROW_OVERHEAD: usize = 8;

/// When a buffer should be flushed; whichever limit is crossed first wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushThresholds {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl Default for FlushThresholds {
    fn default() -> Self {
        Self {
            max_rows: 64 * 1024,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

/// In-memory ingestion buffer of one table
pub struct MemTable {
    registry: Arc<SchemaRegistry>,
    thresholds: FlushThresholds,
    buffer: Mutex<Buffer>,
}

#[derive(Default)]
struct Buffer {
    row_count: usize,
    approx_bytes: usize,
    columns: BTreeMap<ColumnId, Vec<Value>>,
}

impl MemTable {
    /// Create an empty buffer validating against `registry`
    pub fn new(registry: Arc<SchemaRegistry>, thresholds: FlushThresholds) -> Self {
        Self {
            registry,
            thresholds,
            buffer: Mutex::new(Buffer::default()),
        }
    }

    /// Append one row; returns the buffered row count afterwards
    pub fn append(&self, row: &Row) -> Result<usize> {
        self.append_rows(std::slice::from_ref(row))
    }

    /// Append rows as a unit
    ///
    /// Every value is validated before anything is appended: on
    /// `SchemaTypeConflict` neither the buffer nor the registry changes.
    pub fn append_rows(&self, rows: &[Row]) -> Result<usize> {
        let mut buffer = self.buffer.lock();

        let ids = self.resolve_columns(rows)?;

        for row in rows {
            let row_index = buffer.row_count;
            let mut row_bytes = ROW_OVERHEAD;
            for (name, value) in row.iter() {
                if value.is_null() {
                    continue;
                }
                let id = ids[name];
                // Back-fill nulls for rows buffered before this column appeared
                let column = buffer
                    .columns
                    .entry(id)
                    .or_insert_with(|| vec![Value::Null; row_index]);
                row_bytes += value.approx_size();
                column.push(value.clone());
            }

            buffer.row_count += 1;
            let row_count = buffer.row_count;
            for column in buffer.columns.values_mut() {
                if column.len() < row_count {
                    column.push(Value::Null);
                    row_bytes += 1;
                }
            }
            buffer.approx_bytes += row_bytes;
        }

        Ok(buffer.row_count)
    }

    /// Whether the buffer crossed its row or byte threshold
    pub fn should_flush(&self) -> bool {
        let buffer = self.buffer.lock();
        buffer.row_count >= self.thresholds.max_rows
            || buffer.approx_bytes >= self.thresholds.max_bytes
    }

    /// Swap the buffer out for flushing and leave an empty one in its place
    pub fn take_and_reset(&self) -> ColumnarBatch {
        let taken = mem::take(&mut *self.buffer.lock());
        ColumnarBatch::from_parts(taken.row_count, taken.columns)
    }

    /// Buffered row count
    pub fn row_count(&self) -> usize {
        self.buffer.lock().row_count
    }

    /// Approximate size in bytes
    pub fn approx_bytes(&self) -> usize {
        self.buffer.lock().approx_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn thresholds(&self) -> FlushThresholds {
        self.thresholds
    }

    /// Validate every non-null value, then register the columns first seen here
    ///
    /// Called with the buffer lock held.
    fn resolve_columns<'r>(&self, rows: &'r [Row]) -> Result<HashMap<&'r str, ColumnId>> {
        let mut ids: HashMap<&str, ColumnId> = HashMap::new();
        let mut pending: Vec<(&str, ValueType)> = Vec::new();
        let mut pending_types: HashMap<&str, ValueType> = HashMap::new();

        for row in rows {
            for (name, value) in row.iter() {
                if value.is_null() {
                    continue;
                }
                let value_type = value.value_type();
                if let Some(id) = self.registry.check(name, value_type)? {
                    ids.insert(name, id);
                    continue;
                }
                match pending_types.get(name) {
                    Some(&first) if first != value_type => {
                        return Err(DistribuitoError::SchemaTypeConflict {
                            column: name.to_string(),
                            existing: first,
                            attempted: value_type,
                        });
                    }
                    Some(_) => {}
                    None => {
                        pending_types.insert(name, value_type);
                        pending.push((name, value_type));
                    }
                }
            }
        }

        for (name, value_type) in pending {
            let id = self.registry.register_or_get(name, value_type)?;
            ids.insert(name, id);
        }
        Ok(ids)
    }
}
