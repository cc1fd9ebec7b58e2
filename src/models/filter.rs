//! Row filter expressions
//!
//! Filters are JSON trees, for example:
//!
//! ```json
//! {"and": [{"valid": {"field": "0001"}}, {"eq": {"field": "0000", "value": "FR"}}]}
//! ```

use serde::{Deserialize, Serialize};

use super::column::RowSchema;
use super::row::Row;

/// Reference to a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub field: String,
}

/// Column compared with a literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field: String,
    pub value: String,
}

/// Numeric range on a column, `start` inclusive and `end` exclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub field: String,
    pub start: f64,
    pub end: f64,
}

/// Boolean predicate evaluated against a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterExpr {
    Eq(FieldValue),
    Contains(FieldValue),
    Empty(FieldRef),
    Valid(FieldRef),
    Invalid(FieldRef),
    Range(FieldRange),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    /// Parse a filter from its JSON text
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Canonical JSON text of the filter
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Evaluate the filter against a row
    pub fn matches(&self, row: &Row, schema: &RowSchema) -> bool {
        match self {
            FilterExpr::Eq(fv) => row.get(&fv.field) == Some(fv.value.as_str()),
            FilterExpr::Contains(fv) => row
                .get(&fv.field)
                .is_some_and(|v| v.to_lowercase().contains(&fv.value.to_lowercase())),
            FilterExpr::Empty(f) => row.is_empty_cell(&f.field),
            FilterExpr::Valid(f) => {
                schema.contains(&f.field) && !row.is_empty_cell(&f.field) && !row.is_invalid(&f.field)
            }
            FilterExpr::Invalid(f) => row.is_invalid(&f.field),
            FilterExpr::Range(r) => row
                .get(&r.field)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .is_some_and(|n| n >= r.start && n < r.end),
            FilterExpr::And(exprs) => exprs.iter().all(|e| e.matches(row, schema)),
            FilterExpr::Or(exprs) => exprs.iter().any(|e| e.matches(row, schema)),
            FilterExpr::Not(expr) => !expr.matches(row, schema),
        }
    }

    /// Whether the filter reads cell validity
    pub fn references_validity(&self) -> bool {
        match self {
            FilterExpr::Valid(_) | FilterExpr::Invalid(_) => true,
            FilterExpr::And(exprs) | FilterExpr::Or(exprs) => {
                exprs.iter().any(FilterExpr::references_validity)
            }
            FilterExpr::Not(expr) => expr.references_validity(),
            _ => false,
        }
    }

    /// Column ids referenced by the filter
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::Eq(fv) | FilterExpr::Contains(fv) => out.push(&fv.field),
            FilterExpr::Empty(f) | FilterExpr::Valid(f) | FilterExpr::Invalid(f) => {
                out.push(&f.field)
            }
            FilterExpr::Range(r) => out.push(&r.field),
            FilterExpr::And(exprs) | FilterExpr::Or(exprs) => {
                exprs.iter().for_each(|e| e.collect_columns(out))
            }
            FilterExpr::Not(expr) => expr.collect_columns(out),
        }
    }
}
