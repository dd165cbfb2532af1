//! Column types, values and table schema.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DvError;

/// Physical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Signed 64-bit integer
    Int64,
    /// Calendar date as days since 1970-01-01
    Date,
    /// UTF-8 string
    Utf8,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int64 => write!(f, "int64"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Utf8 => write!(f, "utf8"),
        }
    }
}

/// A single non-null cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Date(i32),
    Str(String),
}

impl Value {
    /// Returns the column type this value belongs to.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int64,
            Value::Date(_) => ColumnType::Date,
            Value::Str(_) => ColumnType::Utf8,
        }
    }

    /// Compares two values of the same type.
    ///
    /// # Returns
    /// `Err(DvError::TypeMismatch)` when the types differ.
    pub fn try_cmp(&self, other: &Value) -> Result<Ordering, DvError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(DvError::TypeMismatch {
                expected: self.column_type().to_string(),
                got: other.column_type().to_string(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "date({})", d),
            Value::Str(s) => write!(f, "'{}'", s),
        }
    }
}

/// A row of values in schema column order.
pub type Row = Vec<Value>;

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    /// Creates a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self, DvError> {
        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DvError::SchemaMismatch(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        if columns.is_empty() {
            return Err(DvError::SchemaMismatch(
                "schema must have at least one column".to_string(),
            ));
        }
        Ok(Self { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the index of a column by name.
    pub fn index_of(&self, name: &str) -> Result<usize, DvError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| DvError::ColumnNotFound {
                column: name.to_string(),
            })
    }

    pub fn column(&self, name: &str) -> Result<&ColumnDef, DvError> {
        let idx = self.index_of(name)?;
        Ok(&self.columns[idx])
    }

    /// Validates that a row has one value of the right type per column.
    pub fn check_row(&self, row: &[Value]) -> Result<(), DvError> {
        if row.len() != self.columns.len() {
            return Err(DvError::SchemaMismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row) {
            if value.column_type() != column.ty {
                return Err(DvError::TypeMismatch {
                    expected: format!("{} for column '{}'", column.ty, column.name),
                    got: value.column_type().to_string(),
                });
            }
        }
        Ok(())
    }
}
