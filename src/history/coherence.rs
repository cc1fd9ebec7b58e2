//! Replay of an action list over a dataset schema
//!
//! Replaying compiles each action against the evolving schema, which yields the
//! resulting row schema of a step and the columns each action creates. Before an
//! action is compiled, every column it references (target, column parameters and
//! filter fields) must exist. A missing column that some step of the chain creates
//! means the order is wrong and is reported as [`HistoryError::InvalidOrdering`];
//! any other missing column is an unknown column.

use std::collections::BTreeSet;

use super::error::{HistoryError, HistoryResult};
use crate::actions::ActionRegistry;
use crate::models::{Action, ActionError, RowSchema};

/// Schema and created columns after replaying an action list
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub schema: RowSchema,
    /// Column ids created by each action, parallel to the action list
    pub created: Vec<Vec<String>>,
}

impl Replay {
    pub fn created_by(&self, action_index: usize) -> &[String] {
        self.created
            .get(action_index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Map a catalog lookup failure to its history counterpart
pub(crate) fn resolve_error(err: ActionError) -> HistoryError {
    match err {
        ActionError::UnknownAction(name) => HistoryError::UnknownAction(name),
        other => HistoryError::Action(other),
    }
}

/// Replay `actions` on `schema`
///
/// `chain_created` holds the ids created anywhere in the chain being checked; a
/// reference to one of them before it exists is an ordering error.
pub fn replay(
    registry: &ActionRegistry,
    mut schema: RowSchema,
    actions: &[Action],
    chain_created: &BTreeSet<String>,
) -> HistoryResult<Replay> {
    let mut created = Vec::with_capacity(actions.len());
    for (index, action) in actions.iter().enumerate() {
        let resolved = registry.resolve(action).map_err(resolve_error)?;

        let mut referenced = resolved.referenced_columns();
        if let Some(filter) = action.filter()? {
            referenced.extend(filter.columns().into_iter().map(str::to_string));
        }
        if let Some(missing) = referenced.into_iter().find(|id| !schema.contains(id)) {
            if chain_created.contains(&missing) {
                return Err(HistoryError::InvalidOrdering {
                    action_index: index,
                    action: action.name.clone(),
                    column_id: missing,
                });
            }
            return Err(HistoryError::Action(ActionError::UnknownColumn {
                action: action.name.clone(),
                column_id: missing,
            }));
        }

        let (_, new_columns) = resolved.compile(&mut schema)?;
        created.push(new_columns);
    }
    Ok(Replay { schema, created })
}
