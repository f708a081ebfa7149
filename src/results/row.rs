use std::collections::HashMap;
use std::sync::Arc;

use crate::types::SqlValue;

/// A single row of a query result.
///
/// Column names and the name -> index lookup table are shared across every
/// row of one result, so cloning a row never duplicates the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
    values: Vec<SqlValue>,
}

impl Row {
    pub(crate) fn new(
        columns: Arc<Vec<String>>,
        index: Arc<HashMap<String, usize>>,
        values: Vec<SqlValue>,
    ) -> Self {
        Self {
            columns,
            index,
            values,
        }
    }

    /// Build the shared name -> index table for a result's column header.
    pub(crate) fn column_index(columns: &[String]) -> Arc<HashMap<String, usize>> {
        Arc::new(
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
        )
    }

    /// Get a value by column name, or None if the column does not exist.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.index
            .get(column_name)
            .and_then(|&idx| self.values.get(idx))
    }

    /// Get a value by positional index.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// The column names of this row, in result order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the row, yielding its values in column order.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let columns = Arc::new(vec!["id".to_string(), "name".to_string()]);
        let index = Row::column_index(&columns);
        Row::new(
            columns,
            index,
            vec![SqlValue::Int(7), SqlValue::Text("anne".into())],
        )
    }

    #[test]
    fn lookup_by_name_and_index() {
        let row = sample();
        assert_eq!(row.get("id"), Some(&SqlValue::Int(7)));
        assert_eq!(row.get_index(1), Some(&SqlValue::Text("anne".into())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_index(5), None);
    }

    #[test]
    fn into_values_preserves_order() {
        let values = sample().into_values();
        assert_eq!(values[0], SqlValue::Int(7));
        assert_eq!(values.len(), 2);
    }
}
