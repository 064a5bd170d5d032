//! Schema document model.
//!
//! A [`SchemaDocument`] is a point-in-time snapshot of the database's
//! table/column structure, shaped for handing to a text-to-SQL translation
//! component. It is a mapping from table name to column names that
//! preserves both the first-seen order of tables and the catalog order of
//! columns, because the serialized form must be stable and readable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One table and its column names, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumns {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableColumns {
    /// Create an entry with no columns yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }
}

/// Ordered table-to-columns mapping reflected from the catalog.
///
/// Immutable once returned from reflection; a stale document is expected
/// after schema changes (it is a snapshot, not a live view).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaDocument {
    tables: Vec<TableColumns>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SchemaDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column to its table, creating the table entry on first
    /// sight. Insertion order of tables and append order of columns are
    /// both preserved.
    pub fn push_column(&mut self, table: impl Into<String>, column: impl Into<String>) {
        let table = table.into();
        let slot = match self.index.get(&table) {
            Some(&slot) => slot,
            None => {
                let slot = self.tables.len();
                self.index.insert(table.clone(), slot);
                self.tables.push(TableColumns::new(table));
                slot
            }
        };
        self.tables[slot].columns.push(column.into());
    }

    /// Tables in first-seen order.
    pub fn tables(&self) -> &[TableColumns] {
        &self.tables
    }

    /// Column names for a table, if present.
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.index
            .get(table)
            .map(|&slot| self.tables[slot].columns.as_slice())
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when no tables were reflected.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Iterate tables in document order.
    pub fn iter(&self) -> impl Iterator<Item = &TableColumns> {
        self.tables.iter()
    }

    /// Serialize into the transport shape consumed by the translation
    /// component: `{"tables": [{"name": ..., "columns": [...]}, ...]}`.
    ///
    /// Pure and total; table and column order match the document exactly.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tables": self.tables.iter().map(|t| {
                serde_json::json!({ "name": t.name, "columns": t.columns })
            }).collect::<Vec<_>>()
        })
    }
}

impl<'a> IntoIterator for &'a SchemaDocument {
    type Item = &'a TableColumns;
    type IntoIter = std::slice::Iter<'a, TableColumns>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaDocument {
        let mut doc = SchemaDocument::new();
        doc.push_column("users", "id");
        doc.push_column("users", "name");
        doc.push_column("orders", "id");
        doc.push_column("orders", "user_id");
        doc
    }

    #[test]
    fn test_table_order_is_first_seen() {
        let doc = sample();
        let names: Vec<_> = doc.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["users", "orders"]);
    }

    #[test]
    fn test_column_order_is_append_order() {
        let doc = sample();
        assert_eq!(
            doc.columns("users"),
            Some(["id".to_string(), "name".to_string()].as_slice())
        );
        assert_eq!(
            doc.columns("orders"),
            Some(["id".to_string(), "user_id".to_string()].as_slice())
        );
    }

    #[test]
    fn test_interleaved_rows_keep_first_seen_order() {
        let mut doc = SchemaDocument::new();
        doc.push_column("a", "x");
        doc.push_column("b", "y");
        doc.push_column("a", "z");

        let names: Vec<_> = doc.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(
            doc.columns("a"),
            Some(["x".to_string(), "z".to_string()].as_slice())
        );
    }

    #[test]
    fn test_lookup_missing_table() {
        let doc = sample();
        assert!(doc.columns("payments").is_none());
    }

    #[test]
    fn test_len_and_empty() {
        assert!(SchemaDocument::new().is_empty());
        let doc = sample();
        assert_eq!(doc.len(), 2);
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_to_json_shape() {
        let doc = sample();
        assert_eq!(
            doc.to_json(),
            serde_json::json!({
                "tables": [
                    { "name": "users", "columns": ["id", "name"] },
                    { "name": "orders", "columns": ["id", "user_id"] },
                ]
            })
        );
    }

    #[test]
    fn test_serde_matches_to_json() {
        let doc = sample();
        let direct = serde_json::to_value(&doc).unwrap();
        assert_eq!(direct, doc.to_json());
    }

    #[test]
    fn test_to_json_empty_document() {
        let doc = SchemaDocument::new();
        assert_eq!(doc.to_json(), serde_json::json!({ "tables": [] }));
    }
}
