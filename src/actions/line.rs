//! Row-scoped actions

use crate::models::{
    ActionContext, ActionDefinition, ActionError, Behavior, BehaviorSet, CompiledAction, Row,
    RowSchema, ScopeKind, compiled,
};

const ROW_OR_COLUMN: &[ScopeKind] = &[ScopeKind::Row, ScopeKind::Column];

/// Drop rows whose target cell is empty
///
/// With row scope and no column the row is dropped when every cell of the schema is empty.
pub struct DeleteEmpty;

impl ActionDefinition for DeleteEmpty {
    fn name(&self) -> &'static str {
        "delete_empty"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        ROW_OR_COLUMN
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesAll].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let column_id = match ctx.action.column_id() {
            Some(_) => Some(ctx.target_column()?),
            None => None,
        };
        Ok(compiled(move |row: Row, schema: &RowSchema| {
            let empty = match &column_id {
                Some(id) => row.is_empty_cell(id),
                None => schema.ids().all(|id| row.is_empty_cell(id)),
            };
            Ok(if empty { Vec::new() } else { vec![row] })
        }))
    }
}

/// Drop rows whose target cell was flagged invalid
pub struct DeleteInvalid;

impl ActionDefinition for DeleteInvalid {
    fn name(&self) -> &'static str {
        "delete_invalid"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        &[ScopeKind::Column]
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesAll, Behavior::NeedStatisticsInvalid].into()
    }

    fn compile(&self, ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        let column_id = ctx.target_column()?;
        Ok(compiled(move |row: Row, _: &RowSchema| {
            Ok(if row.is_invalid(&column_id) {
                Vec::new()
            } else {
                vec![row]
            })
        }))
    }
}

/// Emit every row twice
pub struct DuplicateRow;

impl ActionDefinition for DuplicateRow {
    fn name(&self) -> &'static str {
        "duplicate_row"
    }

    fn scopes(&self) -> &'static [ScopeKind] {
        &[ScopeKind::Row]
    }

    fn behavior(&self) -> BehaviorSet {
        [Behavior::ValuesAll].into()
    }

    fn compile(&self, _ctx: &mut ActionContext<'_>) -> Result<Box<dyn CompiledAction>, ActionError> {
        Ok(compiled(|row: Row, _: &RowSchema| Ok(vec![row.clone(), row])))
    }
}
