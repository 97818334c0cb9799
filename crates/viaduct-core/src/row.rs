//! Database row representation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result, TypeError};
use crate::value::{FromValue, Value};

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so rows from the same query share one column table.
#[derive(Debug, Clone)]
pub struct Columns {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl Columns {
    /// Create column metadata from an ordered list of names.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a column by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Check if a column exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// All column names, in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a storage lookup.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<Columns>,
}

impl Row {
    /// Create a new row with its own column metadata.
    ///
    /// For multiple rows from one result set, prefer [`Row::with_columns`]
    /// to share the metadata.
    #[must_use]
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(Columns::new(column_names)),
        }
    }

    /// Create a new row sharing existing column metadata.
    #[must_use]
    pub fn with_columns(columns: Arc<Columns>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// The shared column metadata.
    #[must_use]
    pub fn columns(&self) -> Arc<Columns> {
        Arc::clone(&self.columns)
    }

    /// Raw value at an index.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Raw value by column name.
    #[must_use]
    pub fn value_named(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Typed value by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.value_named(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "column",
                actual: "missing".to_string(),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| attach_column(e, name))
    }

    /// Typed value by index.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.value_at(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "column",
                actual: format!("index {index} out of range"),
                column: None,
            })
        })?;
        T::from_value(value)
    }

    /// Number of values in this row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn attach_column(err: Error, name: &str) -> Error {
    match err {
        Error::Type(mut t) => {
            t.column = Some(name.to_string());
            Error::Type(t)
        }
        other => other,
    }
}
