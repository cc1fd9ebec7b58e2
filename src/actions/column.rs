//! Column-scoped actions

use regex::Regex;

use crate::models::{
    ActionContext, ActionDefinition, ActionError, Behavior, BehaviorSet, Column, ColumnType,
    CompiledAction, ParameterDescriptor, ParameterType, Row, RowSchema, ScopeKind, compiled,
};

const CELL_OR_COLUMN: &[ScopeKind] = &[ScopeKind::Cell, ScopeKind::Column];
const COLUMN: &[ScopeKind] = &[ScopeKind::Column];

/// Resolve the source column and the column the result is written to.
///
/// With `create_new_column=true` the result goes to a new column named
/// `<source>_<suffix>`, inserted right after the source.
fn value_target(ctx: &mut ActionContext<'_>, suffix: &str) -> Result<(String, String), ActionError> {
    let source = ctx.target_column()?;
    if !ctx.action.creates_new_column() {
        return Ok((source.clone(), source));
    }
    let name = ctx
        .schema
        .column(&source)
        .map(|c| format!("{}_{}", c.name, suffix))
        .unwrap_or_else(|| suffix.to_string());
    let target = ctx.create_column_after(&source, Column::new("", name));
    Ok((source, target))
}

fn map_cell<F>(mut row: Row, source: &str, target: &str, f: F) -> Row
where
    F: FnOnce(&str) -> String,
{
    let value = row.get(source).map(f);
    row.set(target, value);
    row
}

/// Upper-case every value of a column
pub struct Uppercase;

impl ActionDefinition for Uppercase {
    fn name(&self) -> &'static str {
        "uppercase"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        CELL_OR_COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesColumn].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let (source, target) = value_target(ctx, "upper")?;
        Ok(compiled(move |row: Row, _: &RowSchema| {
            Ok(vec![map_cell(row, &source, &target, |v| v.to_uppercase())])
        }))
    }
}

/// Replace the parts of a value matching a regular expression
pub struct ReplaceOnValue;

impl ActionDefinition for ReplaceOnValue {
    fn name(&self) -> &'static str {
        "replace_on_value"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        CELL_OR_COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesColumn].into()
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::required("pattern", ParameterType::Regex),
            ParameterDescriptor::required("replace_value", ParameterType::String),
        ]
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let raw = ctx.action.required_param("pattern")?;
        let pattern = Regex::new(raw).map_err(|e| ActionError::InvalidParameter {
            action: ctx.action.name.clone(),
            parameter: "pattern".to_string(),
            reason: e.to_string(),
        })?;
        let replacement = ctx.action.required_param("replace_value")?.to_string();
        let (source, target) = value_target(ctx, "replace")?;
        Ok(compiled(move |row: Row, _: &RowSchema| {
            Ok(vec![map_cell(row, &source, &target, |v| {
                pattern.replace_all(v, replacement.as_str()).into_owned()
            })])
        }))
    }
}

/// Force the declared type of a column
pub struct ChangeType;

impl ActionDefinition for ChangeType {
    fn name(&self) -> &'static str {
        "change_type"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::MetadataChangeType].into()
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![ParameterDescriptor::required("new_type", ParameterType::String)]
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let column_id = ctx.target_column()?;
        let raw = ctx.action.required_param("new_type")?;
        let new_type: ColumnType = raw.parse().map_err(|reason| ActionError::InvalidParameter {
            action: ctx.action.name.clone(),
            parameter: "new_type".to_string(),
            reason,
        })?;
        if let Some(column) = ctx.schema.column_mut(&column_id) {
            column.column_type = new_type;
            column.type_forced = true;
        }
        Ok(compiled(|row: Row, _: &RowSchema| Ok(vec![row])))
    }
}

/// Rename a column
pub struct RenameColumn;

impl ActionDefinition for RenameColumn {
    fn name(&self) -> &'static str {
        "rename_column"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::MetadataChangeName].into()
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![ParameterDescriptor::required("new_column_name", ParameterType::String)]
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let column_id = ctx.target_column()?;
        let new_name = ctx.action.required_param("new_column_name")?.to_string();
        if let Some(column) = ctx.schema.column_mut(&column_id) {
            column.name = new_name;
        }
        Ok(compiled(|row: Row, _: &RowSchema| Ok(vec![row])))
    }
}

/// Remove a column from the schema and its cells from every row
pub struct DeleteColumn;

impl ActionDefinition for DeleteColumn {
    fn name(&self) -> &'static str {
        "delete_column"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::MetadataDeleteColumns].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let column_id = ctx.target_column()?;
        ctx.schema.remove(&column_id);
        Ok(compiled(move |mut row: Row, _: &RowSchema| {
            row.remove(&column_id);
            Ok(vec![row])
        }))
    }
}

/// Duplicate a column right after itself
pub struct CopyColumn;

impl ActionDefinition for CopyColumn {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::MetadataCopyColumns].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let source = ctx.target_column()?;
        let copy = ctx
            .schema
            .column(&source)
            .map(|c| {
                let mut copy = c.clone();
                copy.name = format!("{}_copy", c.name);
                copy
            })
            .unwrap_or_else(|| Column::new("", "copy"));
        let target = ctx.create_column_after(&source, copy);
        Ok(compiled(move |row: Row, _: &RowSchema| {
            Ok(vec![map_cell(row, &source, &target, str::to_string)])
        }))
    }
}

/// Add a column holding the character length of another column
pub struct ComputeLength;

impl ActionDefinition for ComputeLength {
    fn name(&self) -> &'static str {
        "compute_length"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::MetadataCreateColumns].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let source = ctx.target_column()?;
        let name = ctx
            .schema
            .column(&source)
            .map(|c| format!("{}_length", c.name))
            .unwrap_or_else(|| "length".to_string());
        let target = ctx.create_column_after(&source, Column::new("", name).with_type(ColumnType::Integer));
        Ok(compiled(move |mut row: Row, _: &RowSchema| {
            let length = row.get(&source).map_or(0, |v| v.chars().count());
            row.set(target.as_str(), Some(length.to_string()));
            Ok(vec![row])
        }))
    }
}

/// Most columns a single split may create
pub const MAX_SPLIT_LIMIT: usize = 1000;

/// Split a column on a separator into `limit` new columns
pub struct Split;

impl ActionDefinition for Split {
    fn name(&self) -> &'static str {
        "split"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::MetadataCreateColumns].into()
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::required("separator", ParameterType::String),
            ParameterDescriptor::optional("limit", ParameterType::Integer),
        ]
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let source = ctx.target_column()?;
        let separator = ctx.action.required_param("separator")?.to_string();
        if separator.is_empty() {
            return Err(ActionError::InvalidParameter {
                action: ctx.action.name.clone(),
                parameter: "separator".to_string(),
                reason: "separator must not be empty".to_string(),
            });
        }
        let limit = match ctx.action.param("limit") {
            None => 2,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ActionError::InvalidParameter {
                    action: ctx.action.name.clone(),
                    parameter: "limit".to_string(),
                    reason: format!("'{}' is not a positive integer", raw),
                })?,
        };
        if limit > MAX_SPLIT_LIMIT {
            return Err(ActionError::InvalidParameter {
                action: ctx.action.name.clone(),
                parameter: "limit".to_string(),
                reason: format!("{} exceeds the maximum of {}", limit, MAX_SPLIT_LIMIT),
            });
        }
        let base_name = ctx
            .schema
            .column(&source)
            .map(|c| c.name.clone())
            .unwrap_or_default();

        let mut targets = Vec::with_capacity(limit);
        let mut after = source.clone();
        for index in 1..=limit {
            let id = ctx.create_column_after(&after, Column::new("", format!("{}_split_{}", base_name, index)));
            after = id.clone();
            targets.push(id);
        }

        Ok(compiled(move |mut row: Row, _: &RowSchema| {
            let value = row.get(&source).unwrap_or_default().to_string();
            let mut parts = value.splitn(targets.len(), separator.as_str());
            for target in &targets {
                row.set(target.as_str(), Some(parts.next().unwrap_or_default().to_string()));
            }
            Ok(vec![row])
        }))
    }
}

/// Swap the values of two columns
pub struct Swap;

impl ActionDefinition for Swap {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        CELL_OR_COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesMultipleColumns].into()
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![ParameterDescriptor::required("selected_column", ParameterType::Column)]
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let left = ctx.target_column()?;
        let right = ctx.action.required_param("selected_column")?.to_string();
        ctx.require_column(&right)?;
        Ok(compiled(move |mut row: Row, _: &RowSchema| {
            let a = row.get(&left).map(str::to_string);
            let b = row.get(&right).map(str::to_string);
            row.set(left.as_str(), b);
            row.set(right.as_str(), a);
            Ok(vec![row])
        }))
    }
}

/// Fill empty cells with the most frequent value of the column
pub struct FillWithMode;

impl ActionDefinition for FillWithMode {
    fn name(&self) -> &'static str {
        "fill_with_mode"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesColumn, Behavior::NeedStatisticsFrequency].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let column_id = ctx.target_column()?;
        let mode = ctx
            .schema
            .column(&column_id)
            .and_then(|c| c.statistics.mode())
            .map(str::to_string);
        Ok(compiled(move |mut row: Row, _: &RowSchema| {
            if let Some(mode) = &mode {
                if row.is_empty_cell(&column_id) {
                    row.set(column_id.as_str(), Some(mode.clone()));
                }
            }
            Ok(vec![row])
        }))
    }
}
