//! In-memory column chunks.

use serde::{Deserialize, Serialize};

use crate::error::DvError;
use crate::schema::{ColumnType, Row, Value};

use super::ColumnStats;

/// Values of one column for every row of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Date(Vec<i32>),
    Utf8(Vec<String>),
}

impl ColumnData {
    /// Creates an empty column of the given type.
    pub fn with_capacity(ty: ColumnType, capacity: usize) -> Self {
        match ty {
            ColumnType::Int64 => ColumnData::Int64(Vec::with_capacity(capacity)),
            ColumnType::Date => ColumnData::Date(Vec::with_capacity(capacity)),
            ColumnType::Utf8 => ColumnData::Utf8(Vec::with_capacity(capacity)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::Date(_) => ColumnType::Date,
            ColumnData::Utf8(_) => ColumnType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Date(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value, checking its type.
    pub fn push(&mut self, value: Value) -> Result<(), DvError> {
        match (self, value) {
            (ColumnData::Int64(v), Value::Int(x)) => v.push(x),
            (ColumnData::Date(v), Value::Date(x)) => v.push(x),
            (ColumnData::Utf8(v), Value::Str(x)) => v.push(x),
            (column, value) => {
                return Err(DvError::TypeMismatch {
                    expected: column.column_type().to_string(),
                    got: value.column_type().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Returns the value at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn value(&self, index: usize) -> Value {
        match self {
            ColumnData::Int64(v) => Value::Int(v[index]),
            ColumnData::Date(v) => Value::Date(v[index]),
            ColumnData::Utf8(v) => Value::Str(v[index].clone()),
        }
    }

    /// Computes min/max over the column, `None` when empty.
    pub fn stats(&self) -> Option<ColumnStats> {
        match self {
            ColumnData::Int64(v) => {
                let min = v.iter().min()?;
                let max = v.iter().max()?;
                Some(ColumnStats {
                    min: Value::Int(*min),
                    max: Value::Int(*max),
                })
            }
            ColumnData::Date(v) => {
                let min = v.iter().min()?;
                let max = v.iter().max()?;
                Some(ColumnStats {
                    min: Value::Date(*min),
                    max: Value::Date(*max),
                })
            }
            ColumnData::Utf8(v) => {
                let min = v.iter().min()?;
                let max = v.iter().max()?;
                Some(ColumnStats {
                    min: Value::Str(min.clone()),
                    max: Value::Str(max.clone()),
                })
            }
        }
    }
}

/// A set of named columns read from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBatch {
    pub row_count: u64,
    pub columns: Vec<(String, ColumnData)>,
}

impl ColumnBatch {
    pub fn column(&self, name: &str) -> Result<&ColumnData, DvError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| DvError::ColumnNotFound {
                column: name.to_string(),
            })
    }

    /// Materializes the row at `position` in batch column order.
    pub fn row(&self, position: usize) -> Row {
        self.columns.iter().map(|(_, c)| c.value(position)).collect()
    }
}
