mod row;

pub use row::Row;

use crate::types::SqlValue;

/// The result form a caller requests from the executor.
///
/// The shape is always selected by the caller, never inferred from the SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// All rows, as column-name -> value maps.
    Rows,
    /// The first row, if any.
    FirstRow,
    /// The first column of the first row, if any.
    FirstValue,
    /// The rows-affected count from the result header.
    Affected,
}

/// A shaped query result, tagged with the shape that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaped {
    Rows(Vec<Row>),
    FirstRow(Option<Row>),
    FirstValue(Option<SqlValue>),
    Affected(u64),
}
