//! Column statistics
//!
//! Min/max over non-null values of orderable columns plus a null count,
//! computed during encode and stored in the segment footer so that callers
//! can prune segments without touching column blocks.

use std::cmp::Ordering;

use crate::schema::{Value, ValueType};

/// Statistics of one column within one segment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnStats {
    /// Smallest non-null value (orderable types only)
    pub min: Option<Value>,
    /// Largest non-null value (orderable types only)
    pub max: Option<Value>,
    pub null_count: u64,
    pub row_count: u64,
}

impl ColumnStats {
    /// Compute statistics for `values` declared as `value_type`
    ///
    /// NaN floats are ignored for min/max.
    pub fn compute(value_type: ValueType, values: &[Value]) -> Self {
        let mut stats = ColumnStats {
            row_count: values.len() as u64,
            ..Default::default()
        };

        for value in values {
            if value.is_null() {
                stats.null_count += 1;
                continue;
            }
            if !value_type.is_orderable() {
                continue;
            }
            if matches!(value, Value::Float64(f) if f.is_nan()) {
                continue;
            }
            if stats
                .min
                .as_ref()
                .map_or(true, |m| value.compare(m) == Some(Ordering::Less))
            {
                stats.min = Some(value.clone());
            }
            if stats
                .max
                .as_ref()
                .map_or(true, |m| value.compare(m) == Some(Ordering::Greater))
            {
                stats.max = Some(value.clone());
            }
        }
        stats
    }

    /// Statistics of a column a segment has no block for
    pub fn all_null(row_count: u64) -> Self {
        ColumnStats {
            min: None,
            max: None,
            null_count: row_count,
            row_count,
        }
    }

    /// Whether min/max are present
    pub fn has_stats(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    pub fn non_null_count(&self) -> u64 {
        self.row_count - self.null_count
    }

    pub fn is_all_null(&self) -> bool {
        self.null_count == self.row_count
    }

    /// Could any value in the column be `> bound`?
    ///
    /// Conservative: answers `true` whenever the statistics cannot rule it out.
    pub fn may_contain_greater_than(&self, bound: &Value) -> bool {
        if self.is_all_null() {
            return false;
        }
        match &self.max {
            Some(max) => !matches!(
                max.compare(bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            None => true,
        }
    }

    /// Could any value in the column be `< bound`?
    pub fn may_contain_less_than(&self, bound: &Value) -> bool {
        if self.is_all_null() {
            return false;
        }
        match &self.min {
            Some(min) => !matches!(
                min.compare(bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            None => true,
        }
    }

    /// Could any value fall in the closed range `[low, high]`?
    pub fn overlaps(&self, low: &Value, high: &Value) -> bool {
        if self.is_all_null() {
            return false;
        }
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => {
                min.compare(high) != Some(Ordering::Greater)
                    && max.compare(low) != Some(Ordering::Less)
            }
            _ => true,
        }
    }

    /// Could the column contain `value`?
    pub fn may_contain(&self, value: &Value) -> bool {
        self.overlaps(value, value)
    }
}
