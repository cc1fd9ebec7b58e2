//! Action model and the action catalog contract
//!
//! An [`Action`] is an immutable value: a name plus a flat, string-keyed parameter map.
//! Its executable side comes from an [`ActionDefinition`] looked up by name, which
//! declares the action's [`Behavior`] tags and compiles it into a [`CompiledAction`]
//! once per pipeline run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::column::{Column, RowSchema};
use super::filter::FilterExpr;
use super::row::Row;

/// Well-known parameter names
pub mod params {
    pub const SCOPE: &str = "scope";
    pub const COLUMN_ID: &str = "column_id";
    pub const COLUMN_NAME: &str = "column_name";
    pub const ROW_ID: &str = "row_id";
    pub const FILTER: &str = "filter";
    pub const CREATE_NEW_COLUMN: &str = "create_new_column";
}

/// Errors raised while compiling or applying an action
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// No catalog entry with this name
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Required parameter absent
    #[error("Action '{action}' is missing parameter '{parameter}'")]
    MissingParameter { action: String, parameter: String },

    /// Parameter present but unusable
    #[error("Action '{action}' has invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        action: String,
        parameter: String,
        reason: String,
    },

    /// Referenced column absent from the schema
    #[error("Action '{action}' references unknown column '{column_id}'")]
    UnknownColumn { action: String, column_id: String },

    /// Scope not supported by the action
    #[error("Action '{action}' does not support scope '{scope}'")]
    UnsupportedScope { action: String, scope: ScopeKind },
}

/// Where an action applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// A single cell: the target column of the row named by `row_id`
    Cell,
    /// A whole row
    Row,
    /// A whole column
    #[default]
    Column,
    /// The whole dataset
    Dataset,
}

impl ScopeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::Row => "line",
            Self::Column => "column",
            Self::Dataset => "dataset",
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cell" => Ok(Self::Cell),
            "line" | "row" => Ok(Self::Row),
            "column" => Ok(Self::Column),
            "dataset" => Ok(Self::Dataset),
            _ => Err(format!("Unknown scope: {}", s)),
        }
    }
}

/// Side effects an action declares; drives the statistics profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Behavior {
    ValuesAll,
    ValuesColumn,
    ValuesMultipleColumns,
    MetadataChangeType,
    MetadataChangeName,
    MetadataCreateColumns,
    MetadataCopyColumns,
    MetadataDeleteColumns,
    NeedStatisticsPattern,
    NeedStatisticsInvalid,
    NeedStatisticsQuality,
    NeedStatisticsFrequency,
}

impl Behavior {
    /// Whether this tag asks for fresh statistics before the action runs
    pub fn needs_statistics(&self) -> bool {
        matches!(
            self,
            Self::NeedStatisticsPattern
                | Self::NeedStatisticsInvalid
                | Self::NeedStatisticsQuality
                | Self::NeedStatisticsFrequency
        )
    }
}

/// Set of behavior tags
pub type BehaviorSet = BTreeSet<Behavior>;

/// Kind of a declared action parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Boolean,
    Regex,
    /// Reference to another column by id
    Column,
}

/// Parameter declared by an action definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    pub parameter_type: ParameterType,
    pub required: bool,
}

impl ParameterDescriptor {
    pub const fn required(name: &'static str, parameter_type: ParameterType) -> Self {
        Self {
            name,
            parameter_type,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, parameter_type: ParameterType) -> Self {
        Self {
            name,
            parameter_type,
            required: false,
        }
    }
}

/// A named transformation with its parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "action")]
    pub name: String,
    /// Sorted so identical content always serializes identically
    pub parameters: BTreeMap<String, String>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Column-scoped action on `column_id`
    pub fn on_column(name: impl Into<String>, column_id: impl Into<String>) -> Self {
        Self::new(name)
            .with_param(params::SCOPE, ScopeKind::Column.name())
            .with_param(params::COLUMN_ID, column_id)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parameter that must be present
    pub fn required_param(&self, key: &str) -> Result<&str, ActionError> {
        self.param(key).ok_or_else(|| ActionError::MissingParameter {
            action: self.name.clone(),
            parameter: key.to_string(),
        })
    }

    pub fn column_id(&self) -> Option<&str> {
        self.param(params::COLUMN_ID)
    }

    /// Declared scope, column scope when absent
    pub fn scope(&self) -> Result<ScopeKind, ActionError> {
        match self.param(params::SCOPE) {
            None => Ok(ScopeKind::Column),
            Some(raw) => raw.parse().map_err(|reason| ActionError::InvalidParameter {
                action: self.name.clone(),
                parameter: params::SCOPE.to_string(),
                reason,
            }),
        }
    }

    /// Optional row filter restricting the rows the action applies to
    pub fn filter(&self) -> Result<Option<FilterExpr>, ActionError> {
        match self.param(params::FILTER) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => FilterExpr::parse(raw)
                .map(Some)
                .map_err(|e| ActionError::InvalidParameter {
                    action: self.name.clone(),
                    parameter: params::FILTER.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Whether the filter parameter reads cell validity
    pub fn filter_references_validity(&self) -> bool {
        matches!(self.filter(), Ok(Some(f)) if f.references_validity())
    }

    /// Whether the result goes to a new column instead of in place
    pub fn creates_new_column(&self) -> bool {
        self.param(params::CREATE_NEW_COLUMN)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Target row id for cell-scoped actions
    pub fn row_id(&self) -> Option<u64> {
        self.param(params::ROW_ID).and_then(|v| v.parse().ok())
    }
}

/// Compilation context: the action being compiled and the schema it mutates
pub struct ActionContext<'a> {
    pub action: &'a Action,
    pub schema: &'a mut RowSchema,
    created: Vec<String>,
}

impl<'a> ActionContext<'a> {
    pub fn new(action: &'a Action, schema: &'a mut RowSchema) -> Self {
        Self {
            action,
            schema,
            created: Vec::new(),
        }
    }

    /// Id of the target column, which must exist in the schema
    pub fn target_column(&self) -> Result<String, ActionError> {
        let column_id = self.action.required_param(params::COLUMN_ID)?;
        self.require_column(column_id)?;
        Ok(column_id.to_string())
    }

    /// Fail unless `column_id` exists in the schema
    pub fn require_column(&self, column_id: &str) -> Result<(), ActionError> {
        if self.schema.contains(column_id) {
            Ok(())
        } else {
            Err(ActionError::UnknownColumn {
                action: self.action.name.clone(),
                column_id: column_id.to_string(),
            })
        }
    }

    /// Insert a new column after `after_id` and record it as created by this action
    pub fn create_column_after(&mut self, after_id: &str, column: Column) -> String {
        let id = self.schema.insert_after(after_id, column);
        self.created.push(id.clone());
        id
    }

    /// Column ids created during compilation, in creation order
    pub fn created_columns(&self) -> &[String] {
        &self.created
    }

    pub fn into_created_columns(self) -> Vec<String> {
        self.created
    }
}

/// Executable form of an action, built once per pipeline run
///
/// Implementations may hold state (compiled regex, sequence counters). Returning an
/// empty list suppresses the row; returning several rows emits each independently.
pub trait CompiledAction: Send {
    fn apply(&mut self, row: Row, schema: &RowSchema) -> Result<Vec<Row>, ActionError>;
}

impl<F> CompiledAction for F
where
    F: FnMut(Row, &RowSchema) -> Result<Vec<Row>, ActionError> + Send,
{
    fn apply(&mut self, row: Row, schema: &RowSchema) -> Result<Vec<Row>, ActionError> {
        self(row, schema)
    }
}

/// Box a row function as a [`CompiledAction`]
pub fn compiled<F>(f: F) -> Box<dyn CompiledAction>
where
    F: FnMut(Row, &RowSchema) -> Result<Vec<Row>, ActionError> + Send + 'static,
{
    Box::new(f)
}

/// Catalog entry for one action
pub trait ActionDefinition: Send + Sync {
    /// Action name, as referenced by [`Action::name`]
    fn name(&self) -> &'static str;

    /// Scopes the action supports
    fn scopes(&self) -> &'static [ScopeKind];

    /// Declared side effects
    fn behavior(&self) -> BehaviorSet;

    /// Declared parameters (beyond scope/column_id/row_id/filter)
    fn parameters(&self) -> Vec<ParameterDescriptor> {
        Vec::new()
    }

    /// Apply schema changes and build the row function
    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError>;
}

/// An action bound to its catalog definition
#[derive(Clone)]
pub struct ResolvedAction {
    pub action: Action,
    pub definition: Arc<dyn ActionDefinition>,
}

impl ResolvedAction {
    pub fn new(action: Action, definition: Arc<dyn ActionDefinition>) -> Self {
        Self { action, definition }
    }

    pub fn name(&self) -> &str {
        &self.action.name
    }

    pub fn behavior(&self) -> BehaviorSet {
        self.definition.behavior()
    }

    /// Column ids this action reads or writes: the target column plus every
    /// parameter declared as a column reference
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        if let Some(id) = self.action.column_id() {
            columns.push(id.to_string());
        }
        for descriptor in self.definition.parameters() {
            if descriptor.parameter_type == ParameterType::Column {
                if let Some(id) = self.action.param(descriptor.name) {
                    if !columns.iter().any(|c| c == id) {
                        columns.push(id.to_string());
                    }
                }
            }
        }
        columns
    }

    /// Check declared scope and required parameters
    pub fn validate(&self) -> Result<(), ActionError> {
        let scope = self.action.scope()?;
        if !self.definition.scopes().contains(&scope) {
            return Err(ActionError::UnsupportedScope {
                action: self.action.name.clone(),
                scope,
            });
        }
        if matches!(scope, ScopeKind::Cell | ScopeKind::Column) {
            self.action.required_param(params::COLUMN_ID)?;
        }
        if scope == ScopeKind::Cell && self.action.row_id().is_none() {
            let raw = self.action.required_param(params::ROW_ID)?;
            return Err(ActionError::InvalidParameter {
                action: self.action.name.clone(),
                parameter: params::ROW_ID.to_string(),
                reason: format!("'{}' is not a row id", raw),
            });
        }
        for descriptor in self.definition.parameters() {
            if descriptor.required {
                self.action.required_param(descriptor.name)?;
            }
        }
        self.action.filter()?;
        Ok(())
    }

    /// Compile against `schema`, returning the row function and the created column ids
    pub fn compile(
        &self,
        schema: &mut RowSchema,
    ) -> Result<(Box<dyn CompiledAction>, Vec<String>), ActionError> {
        self.validate()?;
        let mut ctx = ActionContext::new(&self.action, schema);
        let compiled = self.definition.compile(&mut ctx)?;
        Ok((compiled, ctx.into_created_columns()))
    }
}

impl std::fmt::Debug for ResolvedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAction")
            .field("action", &self.action)
            .field("behavior", &self.behavior())
            .finish()
    }
}
