//! Row model and row streams

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::column::RowSchema;

/// One row of a dataset
///
/// Cells are keyed by column id. A row is always read against exactly one
/// [`RowSchema`]: cells for ids absent from the schema are ignored, and ids of the
/// schema absent from the row read as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Stable row number in the source dataset
    pub tdp_id: u64,
    values: BTreeMap<String, Option<String>>,
    #[serde(default)]
    deleted: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    invalid: BTreeSet<String>,
}

impl Row {
    pub fn new(tdp_id: u64) -> Self {
        Self {
            tdp_id,
            ..Self::default()
        }
    }

    /// Build a row from `(column id, value)` pairs
    pub fn from_values<I, K, V>(tdp_id: u64, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tdp_id,
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
            ..Self::default()
        }
    }

    pub fn get(&self, column_id: &str) -> Option<&str> {
        self.values.get(column_id).and_then(|v| v.as_deref())
    }

    /// Set (or replace) a cell; the cell's invalid flag is cleared
    pub fn set(&mut self, column_id: impl Into<String>, value: Option<String>) {
        let column_id = column_id.into();
        self.invalid.remove(&column_id);
        self.values.insert(column_id, value);
    }

    pub fn remove(&mut self, column_id: &str) -> Option<String> {
        self.invalid.remove(column_id);
        self.values.remove(column_id).flatten()
    }

    /// Whether a cell is null or blank
    pub fn is_empty_cell(&self, column_id: &str) -> bool {
        self.get(column_id).is_none_or(|v| v.trim().is_empty())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    pub fn is_invalid(&self, column_id: &str) -> bool {
        self.invalid.contains(column_id)
    }

    pub fn set_invalid(&mut self, column_id: impl Into<String>, invalid: bool) {
        let column_id = column_id.into();
        if invalid {
            self.invalid.insert(column_id);
        } else {
            self.invalid.remove(&column_id);
        }
    }

    /// Cell values in schema order
    pub fn ordered_values<'a>(&'a self, schema: &'a RowSchema) -> impl Iterator<Item = Option<&'a str>> {
        schema.ids().map(move |id| self.get(id))
    }
}

/// Finite, ordered, single-pass sequence of rows plus the schema they are read against
pub struct RowStream {
    pub schema: RowSchema,
    rows: Box<dyn Iterator<Item = Row> + Send>,
}

impl RowStream {
    pub fn new<I>(schema: RowSchema, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send + 'static,
    {
        Self {
            schema,
            rows: Box::new(rows.into_iter()),
        }
    }

    /// A stream with a schema and no rows
    pub fn empty(schema: RowSchema) -> Self {
        Self::new(schema, Vec::new())
    }

    /// Upper bound on the number of rows, when the source knows it
    pub fn size_hint(&self) -> Option<u64> {
        self.rows.size_hint().1.map(|n| n as u64)
    }

    /// Split into the schema and the row iterator
    pub fn into_parts(self) -> (RowSchema, Box<dyn Iterator<Item = Row> + Send>) {
        (self.schema, self.rows)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
