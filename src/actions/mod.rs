//! Built-in action catalog
//!
//! The engine only depends on the [`ActionDefinition`] contract; this module ships a
//! small catalog covering the behavior tags the profiler reacts to, so preparations
//! can be replayed without an external catalog.

mod column;
mod line;

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Action, ActionDefinition, ActionError, ResolvedAction};

pub use column::{
    ChangeType, ComputeLength, CopyColumn, DeleteColumn, FillWithMode, RenameColumn, ReplaceOnValue,
    Split, Swap, Uppercase,
};
pub use line::{DeleteEmpty, DeleteInvalid, DuplicateRow};

/// Name → definition lookup
#[derive(Clone, Default)]
pub struct ActionRegistry {
    definitions: HashMap<&'static str, Arc<dyn ActionDefinition>>,
}

impl ActionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Uppercase));
        registry.register(Arc::new(ReplaceOnValue));
        registry.register(Arc::new(ChangeType));
        registry.register(Arc::new(RenameColumn));
        registry.register(Arc::new(DeleteColumn));
        registry.register(Arc::new(CopyColumn));
        registry.register(Arc::new(ComputeLength));
        registry.register(Arc::new(Split));
        registry.register(Arc::new(Swap));
        registry.register(Arc::new(FillWithMode));
        registry.register(Arc::new(DeleteEmpty));
        registry.register(Arc::new(DeleteInvalid));
        registry.register(Arc::new(DuplicateRow));
        registry
    }

    /// Add or replace a definition
    pub fn register(&mut self, definition: Arc<dyn ActionDefinition>) {
        self.definitions.insert(definition.name(), definition);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.definitions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Bind an action to its definition
    pub fn resolve(&self, action: &Action) -> Result<ResolvedAction, ActionError> {
        self.get(&action.name)
            .map(|definition| ResolvedAction::new(action.clone(), definition))
            .ok_or_else(|| ActionError::UnknownAction(action.name.clone()))
    }

    /// Bind a whole action list, failing on the first unknown name
    pub fn resolve_all(&self, actions: &[Action]) -> Result<Vec<ResolvedAction>, ActionError> {
        actions.iter().map(|a| self.resolve(a)).collect()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
