//! Core data model: columns, row schemas, rows, actions, filters, steps and preparations

pub mod action;
pub mod column;
pub mod filter;
pub mod row;
pub mod step;

pub use action::{
    Action, ActionContext, ActionDefinition, ActionError, Behavior, BehaviorSet, CompiledAction,
    ParameterDescriptor, ParameterType, ResolvedAction, ScopeKind, compiled, params,
};
pub use column::{
    Column, ColumnType, Frequency, HistogramRange, RowSchema, SemanticDomain, Statistics,
    format_column_id,
};
pub use filter::{FieldRange, FieldRef, FieldValue, FilterExpr};
pub use row::{Row, RowStream};
pub use step::{Preparation, ROOT_STEP_ID, Step, step_hash};
