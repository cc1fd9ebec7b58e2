//! Document-style storage for steps and preparations
//!
//! The engine only needs equality and membership predicates on indexed fields
//! (id, parent id, dataset id), so any document store can back [`Repository`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::error::{HistoryError, HistoryResult};
use crate::models::{Preparation, Step};

/// Stored entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Step,
    Preparation,
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Step(Step),
    Preparation(Preparation),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Step(_) => EntityKind::Step,
            Entity::Preparation(_) => EntityKind::Preparation,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Step(step) => &step.id,
            Entity::Preparation(prep) => &prep.id,
        }
    }

    fn parent_id(&self) -> Option<&str> {
        match self {
            Entity::Step(step) => step.parent_id.as_deref(),
            Entity::Preparation(_) => None,
        }
    }

    fn dataset_id(&self) -> Option<&str> {
        match self {
            Entity::Step(_) => None,
            Entity::Preparation(prep) => Some(&prep.dataset_id),
        }
    }

    pub fn into_step(self) -> Option<Step> {
        match self {
            Entity::Step(step) => Some(step),
            Entity::Preparation(_) => None,
        }
    }

    pub fn into_preparation(self) -> Option<Preparation> {
        match self {
            Entity::Preparation(prep) => Some(prep),
            Entity::Step(_) => None,
        }
    }
}

/// Selection over indexed fields
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    IdEq(String),
    IdIn(BTreeSet<String>),
    ParentEq(String),
    DatasetEq(String),
}

impl Predicate {
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::All => true,
            Predicate::IdEq(id) => entity.id() == id,
            Predicate::IdIn(ids) => ids.contains(entity.id()),
            Predicate::ParentEq(parent) => entity.parent_id() == Some(parent.as_str()),
            Predicate::DatasetEq(dataset) => entity.dataset_id() == Some(dataset.as_str()),
        }
    }
}

/// Backing store contract of the history engine
pub trait Repository: Send + Sync {
    fn get(&self, id: &str, kind: EntityKind) -> HistoryResult<Option<Entity>>;

    fn list(&self, kind: EntityKind, predicate: &Predicate) -> HistoryResult<Vec<Entity>>;

    /// Insert or replace by `(kind, id)`
    fn add(&self, entity: Entity) -> HistoryResult<()>;

    /// Remove matching entities; returns how many
    fn remove(&self, kind: EntityKind, predicate: &Predicate) -> HistoryResult<usize>;
}

/// Process-local [`Repository`], seeded with the root step
#[derive(Debug)]
pub struct InMemoryRepository {
    entities: RwLock<BTreeMap<(EntityKind, String), Entity>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        let root = Step::root();
        let mut entities = BTreeMap::new();
        entities.insert((EntityKind::Step, root.id.clone()), Entity::Step(root));
        Self {
            entities: RwLock::new(entities),
        }
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities
            .read()
            .map(|e| e.keys().filter(|(k, _)| *k == kind).count())
            .unwrap_or(0)
    }
}

fn poisoned() -> HistoryError {
    HistoryError::repository("repository lock poisoned")
}

impl Repository for InMemoryRepository {
    fn get(&self, id: &str, kind: EntityKind) -> HistoryResult<Option<Entity>> {
        let entities = self.entities.read().map_err(|_| poisoned())?;
        Ok(entities.get(&(kind, id.to_string())).cloned())
    }

    fn list(&self, kind: EntityKind, predicate: &Predicate) -> HistoryResult<Vec<Entity>> {
        let entities = self.entities.read().map_err(|_| poisoned())?;
        Ok(entities
            .iter()
            .filter(|((k, _), entity)| *k == kind && predicate.matches(entity))
            .map(|(_, entity)| entity.clone())
            .collect())
    }

    fn add(&self, entity: Entity) -> HistoryResult<()> {
        let mut entities = self.entities.write().map_err(|_| poisoned())?;
        entities.insert((entity.kind(), entity.id().to_string()), entity);
        Ok(())
    }

    fn remove(&self, kind: EntityKind, predicate: &Predicate) -> HistoryResult<usize> {
        let mut entities = self.entities.write().map_err(|_| poisoned())?;
        let before = entities.len();
        entities.retain(|(k, _), entity| *k != kind || !predicate.matches(entity));
        Ok(before - entities.len())
    }
}
