//! Column and row schema model
//!
//! A [`RowSchema`] is the ordered list of [`Column`]s describing one row stream.
//! Column order is significant: it is the output order of the dataset, and
//! columns created by actions are inserted right after the column they derive from.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Declared type of a column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Double,
    Boolean,
    Date,
}

impl ColumnType {
    /// Get the type name
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }

    /// Whether values of this type are numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Double)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "text" => Ok(Self::String),
            "integer" | "int" | "long" => Ok(Self::Integer),
            "double" | "float" | "decimal" | "numeric" => Ok(Self::Double),
            "boolean" | "bool" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            _ => Err(format!("Unknown column type: {}", s)),
        }
    }
}

/// Semantic domain detected or forced on a column (e.g. "EMAIL", "COUNTRY")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticDomain {
    pub id: String,
    pub label: String,
    /// Share of values matching the domain, in percent
    pub frequency: f64,
    /// Type the domain values are expressed in, if the domain implies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<ColumnType>,
}

/// One bucket of a numeric histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRange {
    pub min: f64,
    pub max: f64,
    pub occurrences: u64,
}

/// A value (or pattern) and how often it occurs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub value: String,
    pub occurrences: u64,
}

/// Computed statistics of a column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub count: u64,
    pub valid: u64,
    pub invalid: u64,
    pub empty: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    pub distinct_count: u64,
    pub duplicate_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub histogram: Vec<HistogramRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pattern_frequencies: Vec<Frequency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_frequencies: Vec<Frequency>,
}

impl Statistics {
    /// Most frequent value, if frequency analysis ran
    pub fn mode(&self) -> Option<&str> {
        self.value_frequencies.first().map(|f| f.value.as_str())
    }
}

/// Column of a row schema
///
/// `id` is a short, stable identifier ("0000", "0001", ...) unique within the schema;
/// actions and filters always reference columns by id, never by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Type was set by the user and must not be replaced by type detection
    #[serde(default)]
    pub type_forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<SemanticDomain>,
    /// Domain was set by the user and must survive type changes
    #[serde(default)]
    pub domain_forced: bool,
    #[serde(default)]
    pub statistics: Statistics,
}

impl Column {
    /// Create a string column
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            column_type: ColumnType::String,
            type_forced: false,
            domain: None,
            domain_forced: false,
            statistics: Statistics::default(),
        }
    }

    /// Set the column type
    pub fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    /// Set the semantic domain
    pub fn with_domain(mut self, domain: SemanticDomain) -> Self {
        self.domain = Some(domain);
        self
    }
}

/// Ordered, mutable set of columns describing a row stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSchema {
    columns: Vec<Column>,
    /// Lowest id never handed out; only grows, so deleted ids are not reused
    #[serde(default)]
    id_watermark: u32,
}

impl RowSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema of string columns from names, with ids "0000", "0001", ...
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Column::new(format_column_id(index as u32), name))
            .collect();
        Self::with_columns(columns)
    }

    /// Build a schema from columns, rejecting duplicate ids
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, String> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.id.as_str()) {
                return Err(format!("Duplicate column id: {}", column.id));
            }
        }
        Ok(Self::with_columns(columns))
    }

    fn with_columns(columns: Vec<Column>) -> Self {
        let mut schema = Self { columns, id_watermark: 0 };
        schema.id_watermark = schema.highest_id_in_use().map_or(0, |max| max + 1);
        schema
    }

    fn highest_id_in_use(&self) -> Option<u32> {
        self.columns.iter().filter_map(|c| c.id.parse::<u32>().ok()).max()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        self.columns.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_mut(&mut self, id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.column(id).is_some()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.id.as_str())
    }

    /// Next column id to be handed out; ids of removed columns are never reused
    pub fn next_id(&self) -> String {
        format_column_id(self.next_index())
    }

    fn next_index(&self) -> u32 {
        let in_use = self.highest_id_in_use().map_or(0, |max| max + 1);
        self.id_watermark.max(in_use)
    }

    fn allocate_id(&mut self) -> String {
        let index = self.next_index();
        self.id_watermark = index + 1;
        format_column_id(index)
    }

    /// Append a column at the end, assigning it a fresh id. Returns the new id.
    pub fn push(&mut self, mut column: Column) -> String {
        let id = self.allocate_id();
        column.id = id.clone();
        self.columns.push(column);
        id
    }

    /// Insert a column right after `after_id` (at the end when `after_id` is unknown),
    /// assigning it a fresh id. Returns the new id.
    pub fn insert_after(&mut self, after_id: &str, mut column: Column) -> String {
        let id = self.allocate_id();
        column.id = id.clone();
        match self.position(after_id) {
            Some(index) => self.columns.insert(index + 1, column),
            None => self.columns.push(column),
        }
        id
    }

    /// Remove a column, keeping the relative order of the others
    pub fn remove(&mut self, id: &str) -> Option<Column> {
        let index = self.position(id)?;
        Some(self.columns.remove(index))
    }

    /// Swap the positions of two columns
    pub fn swap(&mut self, a: &str, b: &str) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(i), Some(j)) => {
                self.columns.swap(i, j);
                true
            }
            _ => false,
        }
    }
}

/// Format a numeric column id as a 4-digit, zero-padded string
pub fn format_column_id(index: u32) -> String {
    format!("{:04}", index)
}
