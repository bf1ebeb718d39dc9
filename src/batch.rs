//! Rows and columnar batches
//!
//! A [`Row`] is what callers hand to the engine: a sparse, owned map from
//! column name to value. A [`ColumnarBatch`] is the engine's internal shape:
//! one equally long value vector per column id.

use std::collections::BTreeMap;

use crate::error::{DistribuitoError, Result};
use crate::schema::{ColumnId, SchemaSnapshot, Value};

/// A sparse row; absent columns are null
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Value of `name`, or `None` if the row does not mention it
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Column-major batch of rows
///
/// Invariant: every column vector has exactly `row_count` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnarBatch {
    row_count: usize,
    columns: BTreeMap<ColumnId, Vec<Value>>,
}

impl ColumnarBatch {
    /// A batch of `row_count` rows with no columns yet
    pub fn new(row_count: usize) -> Self {
        Self {
            row_count,
            columns: BTreeMap::new(),
        }
    }

    /// Build from complete column vectors
    pub fn from_columns(
        row_count: usize,
        columns: impl IntoIterator<Item = (ColumnId, Vec<Value>)>,
    ) -> Result<Self> {
        let mut batch = Self::new(row_count);
        for (id, values) in columns {
            batch.insert_column(id, values)?;
        }
        Ok(batch)
    }

    /// Assemble from parts the caller already keeps at equal length
    pub(crate) fn from_parts(row_count: usize, columns: BTreeMap<ColumnId, Vec<Value>>) -> Self {
        debug_assert!(columns.values().all(|v| v.len() == row_count));
        Self { row_count, columns }
    }

    /// Add or replace a column; its length must equal the row count
    pub fn insert_column(&mut self, id: ColumnId, values: Vec<Value>) -> Result<()> {
        if values.len() != self.row_count {
            return Err(DistribuitoError::Codec(format!(
                "column {} has {} values, batch has {} rows",
                id,
                values.len(),
                self.row_count
            )));
        }
        self.columns.insert(id, values);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column(&self, id: ColumnId) -> Option<&[Value]> {
        self.columns.get(&id).map(|v| v.as_slice())
    }

    pub fn column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.columns.keys().copied()
    }

    pub fn columns(&self) -> impl Iterator<Item = (ColumnId, &[Value])> {
        self.columns.iter().map(|(id, v)| (*id, v.as_slice()))
    }

    pub fn into_columns(self) -> BTreeMap<ColumnId, Vec<Value>> {
        self.columns
    }

    /// Concatenate `other` below `self`, null-filling columns either side lacks
    pub fn append(&mut self, other: &ColumnarBatch) {
        let before = self.row_count;
        for (id, values) in self.columns.iter_mut() {
            match other.columns.get(id) {
                Some(theirs) => values.extend_from_slice(theirs),
                None => values.resize(before + other.row_count, Value::Null),
            }
        }
        for (id, theirs) in &other.columns {
            if !self.columns.contains_key(id) {
                let mut values = Vec::with_capacity(before + theirs.len());
                values.resize(before, Value::Null);
                values.extend_from_slice(theirs);
                self.columns.insert(*id, values);
            }
        }
        self.row_count += other.row_count;
    }

    /// Keep only `ids`; requested ids this batch lacks become all-null columns
    pub fn project(&self, ids: &[ColumnId]) -> ColumnarBatch {
        let mut out = ColumnarBatch::new(self.row_count);
        for id in ids {
            let values = self
                .columns
                .get(id)
                .cloned()
                .unwrap_or_else(|| vec![Value::Null; self.row_count]);
            out.columns.insert(*id, values);
        }
        out
    }

    /// Reassemble row `index` with column names from `schema`; nulls are omitted
    pub fn row(&self, index: usize, schema: &SchemaSnapshot) -> Option<Row> {
        if index >= self.row_count {
            return None;
        }
        let mut row = Row::new();
        for (id, values) in &self.columns {
            let value = &values[index];
            if value.is_null() {
                continue;
            }
            if let Some(def) = schema.get(*id) {
                row.insert(def.name.clone(), value.clone());
            }
        }
        Some(row)
    }

    /// All rows, in order
    pub fn to_rows(&self, schema: &SchemaSnapshot) -> Vec<Row> {
        (0..self.row_count)
            .filter_map(|i| self.row(i, schema))
            .collect()
    }

    /// Approximate in-memory footprint of the values
    pub fn approx_bytes(&self) -> usize {
        self.columns
            .values()
            .flat_map(|v| v.iter())
            .map(Value::approx_size)
            .sum()
    }
}
