//! Delete predicates: expression tree, statistics pruning and row evaluation.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::data_file::{ColumnBatch, ColumnData, DataFile};
use crate::error::DvError;
use crate::schema::{Schema, Value};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
        }
    }
}

/// Boolean expression over one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column <op> literal`
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// Matches every row
    True,
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn lt(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn gt_eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, CompareOp::GtEq, value)
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Names of all referenced columns, sorted and deduplicated.
    pub fn columns(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out.into_iter().collect()
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Compare { column, .. } => {
                out.insert(column.clone());
            }
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Predicate::Not(inner) => inner.collect_columns(out),
            Predicate::True => {}
        }
    }

    /// Checks column names and literal types against the schema.
    pub fn validate(&self, schema: &Schema) -> Result<(), DvError> {
        match self {
            Predicate::Compare { column, value, .. } => {
                let def = schema.column(column)?;
                if def.ty != value.column_type() {
                    return Err(DvError::TypeMismatch {
                        expected: format!("{} for column '{}'", def.ty, column),
                        got: value.column_type().to_string(),
                    });
                }
                Ok(())
            }
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.validate(schema)?;
                b.validate(schema)
            }
            Predicate::Not(inner) => inner.validate(schema),
            Predicate::True => Ok(()),
        }
    }

    /// Decides from min/max statistics whether none, all or some rows match.
    pub fn verdict(&self, file: &DataFile) -> Result<StatsVerdict, DvError> {
        match self {
            Predicate::True => Ok(StatsVerdict::All),
            Predicate::Compare { column, op, value } => match file.column_stats(column) {
                Some(stats) => compare_verdict(*op, &stats.min, &stats.max, value),
                None if file.row_count == 0 => Ok(StatsVerdict::None),
                None => Ok(StatsVerdict::Some),
            },
            Predicate::And(a, b) => Ok(a.verdict(file)?.and(b.verdict(file)?)),
            Predicate::Or(a, b) => Ok(a.verdict(file)?.or(b.verdict(file)?)),
            Predicate::Not(inner) => Ok(inner.verdict(file)?.not()),
        }
    }

    /// Evaluates the predicate for the row at `position` of `batch`.
    pub fn matches(&self, batch: &ColumnBatch, position: usize) -> Result<bool, DvError> {
        match self {
            Predicate::True => Ok(true),
            Predicate::Compare { column, op, value } => {
                let data = batch.column(column)?;
                let ord = compare_cell(data, position, value)?;
                Ok(op.holds(ord))
            }
            Predicate::And(a, b) => Ok(a.matches(batch, position)? && b.matches(batch, position)?),
            Predicate::Or(a, b) => Ok(a.matches(batch, position)? || b.matches(batch, position)?),
            Predicate::Not(inner) => Ok(!inner.matches(batch, position)?),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, value } => {
                write!(f, "{} {} {}", column, op.symbol(), value)
            }
            Predicate::And(a, b) => write!(f, "({} AND {})", a, b),
            Predicate::Or(a, b) => write!(f, "({} OR {})", a, b),
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
            Predicate::True => write!(f, "TRUE"),
        }
    }
}

/// Compares one cell without materializing a `Value`.
fn compare_cell(data: &ColumnData, position: usize, value: &Value) -> Result<Ordering, DvError> {
    match (data, value) {
        (ColumnData::Int64(v), Value::Int(x)) => Ok(v[position].cmp(x)),
        (ColumnData::Date(v), Value::Date(x)) => Ok(v[position].cmp(x)),
        (ColumnData::Utf8(v), Value::Str(x)) => Ok(v[position].as_str().cmp(x.as_str())),
        _ => Err(DvError::TypeMismatch {
            expected: data.column_type().to_string(),
            got: value.column_type().to_string(),
        }),
    }
}

/// Outcome of evaluating a predicate against file statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsVerdict {
    /// No row can match; the file is pruned
    None,
    /// Every row matches; the whole file can be dropped
    All,
    /// Rows must be evaluated individually
    Some,
}

impl StatsVerdict {
    fn and(self, other: StatsVerdict) -> StatsVerdict {
        match (self, other) {
            (StatsVerdict::None, _) | (_, StatsVerdict::None) => StatsVerdict::None,
            (StatsVerdict::All, StatsVerdict::All) => StatsVerdict::All,
            _ => StatsVerdict::Some,
        }
    }

    fn or(self, other: StatsVerdict) -> StatsVerdict {
        match (self, other) {
            (StatsVerdict::All, _) | (_, StatsVerdict::All) => StatsVerdict::All,
            (StatsVerdict::None, StatsVerdict::None) => StatsVerdict::None,
            _ => StatsVerdict::Some,
        }
    }

    fn not(self) -> StatsVerdict {
        match self {
            StatsVerdict::None => StatsVerdict::All,
            StatsVerdict::All => StatsVerdict::None,
            StatsVerdict::Some => StatsVerdict::Some,
        }
    }
}

fn compare_verdict(
    op: CompareOp,
    min: &Value,
    max: &Value,
    value: &Value,
) -> Result<StatsVerdict, DvError> {
    let min_ord = min.try_cmp(value)?;
    let max_ord = max.try_cmp(value)?;
    use Ordering::*;

    let verdict = match op {
        CompareOp::Lt if max_ord == Less => StatsVerdict::All,
        CompareOp::Lt if min_ord != Less => StatsVerdict::None,
        CompareOp::LtEq if max_ord != Greater => StatsVerdict::All,
        CompareOp::LtEq if min_ord == Greater => StatsVerdict::None,
        CompareOp::Gt if min_ord == Greater => StatsVerdict::All,
        CompareOp::Gt if max_ord != Greater => StatsVerdict::None,
        CompareOp::GtEq if min_ord != Less => StatsVerdict::All,
        CompareOp::GtEq if max_ord == Less => StatsVerdict::None,
        CompareOp::Eq | CompareOp::NotEq => {
            let eq = if min_ord == Equal && max_ord == Equal {
                StatsVerdict::All
            } else if min_ord == Greater || max_ord == Less {
                StatsVerdict::None
            } else {
                StatsVerdict::Some
            };
            if op == CompareOp::NotEq {
                eq.not()
            } else {
                eq
            }
        }
        _ => StatsVerdict::Some,
    };
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_file::ColumnStats;
    use ntest::timeout;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn file_with_day_range(min: i32, max: i32) -> DataFile {
        let mut stats = BTreeMap::new();
        stats.insert(
            "day".to_string(),
            ColumnStats {
                min: Value::Date(min),
                max: Value::Date(max),
            },
        );
        DataFile {
            id: 1,
            path: PathBuf::from("unused"),
            row_count: 10,
            stats,
            size_bytes: 0,
        }
    }

    #[timeout(1000)]
    #[test]
    fn test_lt_verdicts() {
        let pred = Predicate::lt("day", Value::Date(100));
        assert_eq!(
            pred.verdict(&file_with_day_range(10, 99)).unwrap(),
            StatsVerdict::All
        );
        assert_eq!(
            pred.verdict(&file_with_day_range(100, 200)).unwrap(),
            StatsVerdict::None
        );
        assert_eq!(
            pred.verdict(&file_with_day_range(50, 150)).unwrap(),
            StatsVerdict::Some
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_eq_and_not_verdicts() {
        let file = file_with_day_range(5, 5);
        assert_eq!(
            Predicate::eq("day", Value::Date(5)).verdict(&file).unwrap(),
            StatsVerdict::All
        );
        assert_eq!(
            Predicate::eq("day", Value::Date(5))
                .not()
                .verdict(&file)
                .unwrap(),
            StatsVerdict::None
        );
        assert_eq!(
            Predicate::compare("day", CompareOp::NotEq, Value::Date(6))
                .verdict(&file)
                .unwrap(),
            StatsVerdict::All
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_composed_verdicts() {
        let file = file_with_day_range(10, 20);
        let all = Predicate::lt("day", Value::Date(30));
        let none = Predicate::gt_eq("day", Value::Date(30));
        let some = Predicate::lt("day", Value::Date(15));

        assert_eq!(
            all.clone().and(some.clone()).verdict(&file).unwrap(),
            StatsVerdict::Some
        );
        assert_eq!(
            none.clone().and(some.clone()).verdict(&file).unwrap(),
            StatsVerdict::None
        );
        assert_eq!(all.or(none.clone()).verdict(&file).unwrap(), StatsVerdict::All);
        assert_eq!(none.or(some).verdict(&file).unwrap(), StatsVerdict::Some);
    }

    #[timeout(1000)]
    #[test]
    fn test_missing_stats_is_some() {
        let file = file_with_day_range(1, 2);
        let pred = Predicate::lt("other", Value::Int(3));
        assert_eq!(pred.verdict(&file).unwrap(), StatsVerdict::Some);
    }

    #[timeout(1000)]
    #[test]
    fn test_row_matching() {
        let batch = ColumnBatch {
            row_count: 3,
            columns: vec![
                ("day".to_string(), ColumnData::Date(vec![1, 5, 9])),
                (
                    "name".to_string(),
                    ColumnData::Utf8(vec!["a".into(), "b".into(), "c".into()]),
                ),
            ],
        };
        let pred = Predicate::lt("day", Value::Date(6)).and(
            Predicate::eq("name", Value::Str("a".into())).not(),
        );
        let hits: Vec<bool> = (0..3).map(|i| pred.matches(&batch, i).unwrap()).collect();
        assert_eq!(hits, vec![false, true, false]);

        let bad = Predicate::lt("day", Value::Int(6));
        assert!(matches!(
            bad.matches(&batch, 0),
            Err(DvError::TypeMismatch { .. })
        ));
    }

    #[timeout(1000)]
    #[test]
    fn test_columns_and_display() {
        let pred = Predicate::lt("b", Value::Int(1)).or(Predicate::eq("a", Value::Int(2)));
        assert_eq!(pred.columns(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(pred.to_string(), "(b < 1 OR a = 2)");
    }
}
