//! Step history engine
//!
//! Steps are immutable and content-addressed, so every history mutation (update,
//! delete, reorder) rebuilds the chain from the first changed position: new steps
//! are created for that position and every descendant, and the preparation's head is
//! moved to the new tip. Old steps stay in the repository for other preparations that
//! may share them; their cache entries and step metadata are dropped.
//!
//! All checks, including the ordering check, run before anything is written.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use super::coherence::{Replay, replay};
use super::dataset::DatasetProvider;
use super::error::{HistoryError, HistoryResult};
use super::metadata::StepMetadataUpdater;
use super::repository::{Entity, EntityKind, Predicate, Repository};
use crate::actions::ActionRegistry;
use crate::cache::{CacheKey, ContentCache, evict_or_warn};
use crate::models::{Action, Preparation, ROOT_STEP_ID, RowSchema, Step};

/// Columns created and deleted when going from one step to another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDiff {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
}

impl StepDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// Preparation history: lifecycle, chain mutations, diff
pub struct HistoryEngine {
    repository: Arc<dyn Repository>,
    registry: Arc<ActionRegistry>,
    datasets: Arc<dyn DatasetProvider>,
    cache: Option<Arc<dyn ContentCache>>,
    metadata: Option<Arc<StepMetadataUpdater>>,
    mutation: Mutex<()>,
}

impl HistoryEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<ActionRegistry>,
        datasets: Arc<dyn DatasetProvider>,
    ) -> Self {
        Self {
            repository,
            registry,
            datasets,
            cache: None,
            metadata: None,
            mutation: Mutex::new(()),
        }
    }

    /// Evict cache entries of steps that a mutation makes stale
    pub fn with_cache(mut self, cache: Arc<dyn ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Invalidate step metadata of steps that a mutation makes stale
    pub fn with_metadata_updater(mut self, updater: Arc<StepMetadataUpdater>) -> Self {
        self.metadata = Some(updater);
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn datasets(&self) -> &Arc<dyn DatasetProvider> {
        &self.datasets
    }

    pub fn metadata_updater(&self) -> Option<&Arc<StepMetadataUpdater>> {
        self.metadata.as_ref()
    }

    fn lock(&self) -> HistoryResult<MutexGuard<'_, ()>> {
        self.mutation
            .lock()
            .map_err(|_| HistoryError::repository("history lock poisoned"))
    }

    // ---- lookups ----

    pub fn get_preparation(&self, preparation_id: &str) -> HistoryResult<Preparation> {
        self.repository
            .get(preparation_id, EntityKind::Preparation)?
            .and_then(Entity::into_preparation)
            .ok_or_else(|| HistoryError::PreparationNotFound(preparation_id.to_string()))
    }

    pub fn get_step(&self, step_id: &str) -> HistoryResult<Step> {
        self.repository
            .get(step_id, EntityKind::Step)?
            .and_then(Entity::into_step)
            .ok_or_else(|| HistoryError::StepNotFound(step_id.to_string()))
    }

    /// Preparations built on `dataset_id`
    pub fn list_preparations(&self, dataset_id: &str) -> HistoryResult<Vec<Preparation>> {
        Ok(self
            .repository
            .list(EntityKind::Preparation, &Predicate::DatasetEq(dataset_id.to_string()))?
            .into_iter()
            .filter_map(Entity::into_preparation)
            .collect())
    }

    /// Steps whose parent is `step_id`, from any preparation
    pub fn children(&self, step_id: &str) -> HistoryResult<Vec<Step>> {
        self.get_step(step_id)?;
        let mut children: Vec<Step> = self
            .repository
            .list(EntityKind::Step, &Predicate::ParentEq(step_id.to_string()))?
            .into_iter()
            .filter_map(Entity::into_step)
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    /// Steps from the root to `step_id`, root first
    fn chain_to(&self, step_id: &str) -> HistoryResult<Vec<Step>> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.get_step(step_id)?;
        loop {
            if !seen.insert(current.id.clone()) {
                return Err(HistoryError::repository(format!(
                    "step chain of '{}' has a cycle",
                    step_id
                )));
            }
            let parent = current.parent_id.clone();
            chain.push(current);
            match parent {
                None => break,
                Some(parent) => {
                    current = self.get_step(&parent).map_err(|_| {
                        HistoryError::repository(format!(
                            "step chain of '{}' is broken at '{}'",
                            step_id, parent
                        ))
                    })?;
                }
            }
        }
        chain.reverse();
        match chain.first() {
            Some(root) if root.is_root() => Ok(chain),
            _ => Err(HistoryError::StepNotFound(step_id.to_string())),
        }
    }

    /// Steps of a preparation, root first, head last
    pub fn list_steps(&self, preparation_id: &str) -> HistoryResult<Vec<Step>> {
        let preparation = self.get_preparation(preparation_id)?;
        self.chain_to(&preparation.head_step_id)
    }

    /// Resolve a step reference of a preparation; `"head"` names the current head
    pub fn resolve_step(&self, preparation_id: &str, step_ref: &str) -> HistoryResult<Step> {
        let preparation = self.get_preparation(preparation_id)?;
        if step_ref == "head" {
            self.get_step(&preparation.head_step_id)
        } else {
            self.get_step(step_ref)
        }
    }

    /// Row schema resulting from a step, replayed over the dataset's current schema
    pub fn schema_at(&self, preparation_id: &str, step_id: &str) -> HistoryResult<RowSchema> {
        let preparation = self.get_preparation(preparation_id)?;
        let step = self.get_step(step_id)?;
        Ok(self.replay_for(&preparation, &step.actions)?.schema)
    }

    /// Stored step metadata when available, a replayed schema otherwise
    pub fn step_metadata(&self, preparation_id: &str, step_id: &str) -> HistoryResult<RowSchema> {
        if let Some(updater) = &self.metadata {
            let preparation = self.get_preparation(preparation_id)?;
            if let Some(schema) = updater.get(&preparation.dataset_id, step_id)? {
                return Ok(schema);
            }
        }
        self.schema_at(preparation_id, step_id)
    }

    /// Columns created and deleted between two steps of a preparation
    pub fn diff(&self, preparation_id: &str, from_step_id: &str, to_step_id: &str) -> HistoryResult<StepDiff> {
        let from = self.schema_at(preparation_id, from_step_id)?;
        let to = self.schema_at(preparation_id, to_step_id)?;
        let from_ids: BTreeSet<&str> = from.ids().collect();
        let to_ids: BTreeSet<&str> = to.ids().collect();
        Ok(StepDiff {
            created: to.ids().filter(|id| !from_ids.contains(id)).map(str::to_string).collect(),
            deleted: from.ids().filter(|id| !to_ids.contains(id)).map(str::to_string).collect(),
        })
    }

    fn replay_for(&self, preparation: &Preparation, actions: &[Action]) -> HistoryResult<Replay> {
        self.replay_checked(preparation, actions, &BTreeSet::new())
    }

    fn replay_checked(
        &self,
        preparation: &Preparation,
        actions: &[Action],
        chain_created: &BTreeSet<String>,
    ) -> HistoryResult<Replay> {
        let schema = self.datasets.metadata(&preparation.dataset_id)?;
        replay(&self.registry, schema, actions, chain_created)
    }

    // ---- preparation lifecycle ----

    /// New preparation on an existing dataset, pointing at the root step
    pub fn create_preparation(&self, dataset_id: &str, name: &str, owner: &str) -> HistoryResult<Preparation> {
        self.datasets.metadata(dataset_id)?;
        let preparation = Preparation::new(dataset_id, name, owner);
        self.repository.add(Entity::Preparation(preparation.clone()))?;
        info!(preparation_id = %preparation.id, dataset_id, "Created preparation");
        Ok(preparation)
    }

    /// Delete a preparation and the steps no other preparation's chain uses
    pub fn delete_preparation(&self, preparation_id: &str) -> HistoryResult<usize> {
        let _guard = self.lock()?;
        let preparation = self.get_preparation(preparation_id)?;
        let chain = self.chain_to(&preparation.head_step_id)?;

        let mut shared = BTreeSet::from([ROOT_STEP_ID.to_string()]);
        for other in self.repository.list(EntityKind::Preparation, &Predicate::All)? {
            let Some(other) = other.into_preparation() else {
                continue;
            };
            if other.id == preparation.id {
                continue;
            }
            shared.extend(self.chain_to(&other.head_step_id)?.into_iter().map(|s| s.id));
        }

        let released: BTreeSet<String> = chain
            .into_iter()
            .map(|s| s.id)
            .filter(|id| !shared.contains(id))
            .collect();
        let removed = self
            .repository
            .remove(EntityKind::Step, &Predicate::IdIn(released.clone()))?;
        self.repository
            .remove(EntityKind::Preparation, &Predicate::IdEq(preparation.id.clone()))?;

        if let Some(cache) = &self.cache {
            evict_or_warn(
                cache.as_ref(),
                &CacheKey::preparation_prefix(&preparation.dataset_id, &preparation.id),
            );
        }
        if let Some(updater) = &self.metadata {
            for id in &released {
                updater.invalidate(&preparation.dataset_id, id);
            }
        }
        info!(preparation_id, steps_removed = removed, "Deleted preparation");
        Ok(removed)
    }

    /// Drop every cache entry of a dataset, e.g. after its content changed
    pub fn evict_dataset(&self, dataset_id: &str) -> usize {
        self.cache
            .as_ref()
            .map_or(0, |cache| evict_or_warn(cache.as_ref(), &CacheKey::dataset_prefix(dataset_id)))
    }

    // ---- chain mutations ----

    /// Append an action after the head; returns the new head step
    pub fn append(&self, preparation_id: &str, action: Action) -> HistoryResult<Step> {
        let _guard = self.lock()?;
        let _span = info_span!("history_append", preparation_id, action = %action.name).entered();

        let mut preparation = self.get_preparation(preparation_id)?;
        let head = self.get_step(&preparation.head_step_id)?;

        let mut actions = head.actions.clone();
        actions.push(action);
        let replay = self.replay_for(&preparation, &actions)?;
        let created = replay.created_by(actions.len() - 1).to_vec();

        let step = Step::new(head.id.clone(), actions).with_created_columns(created);
        self.repository.add(Entity::Step(step.clone()))?;
        preparation.set_head(step.id.clone());
        self.repository.add(Entity::Preparation(preparation))?;

        info!(step_id = %step.id, created = ?step.created_column_ids, "Appended step");
        Ok(step)
    }

    /// Replace the action of `step_id`; descendants are rehashed
    pub fn update(&self, preparation_id: &str, step_id: &str, action: Action) -> HistoryResult<Step> {
        let _guard = self.lock()?;
        let _span = info_span!("history_update", preparation_id, step_id).entered();

        let preparation = self.get_preparation(preparation_id)?;
        let chain = self.chain_to(&preparation.head_step_id)?;
        let position = step_position(&chain, step_id)?;

        let mut own = own_actions(&chain);
        own[position - 1] = action;
        self.rewrite(preparation, &chain, position, own)
    }

    /// Remove `step_id` from the chain; descendants are rehashed
    pub fn delete(&self, preparation_id: &str, step_id: &str) -> HistoryResult<Step> {
        let _guard = self.lock()?;
        let _span = info_span!("history_delete", preparation_id, step_id).entered();

        let preparation = self.get_preparation(preparation_id)?;
        let chain = self.chain_to(&preparation.head_step_id)?;
        let position = step_position(&chain, step_id)?;

        let mut own = own_actions(&chain);
        own.remove(position - 1);
        self.rewrite(preparation, &chain, position, own)
    }

    /// Move the action of `step_id` right after `after_step_id` (the root to move
    /// it first); descendants of the first changed position are rehashed
    pub fn move_step(&self, preparation_id: &str, step_id: &str, after_step_id: &str) -> HistoryResult<Step> {
        let _guard = self.lock()?;
        let _span = info_span!("history_move", preparation_id, step_id, after_step_id).entered();

        let preparation = self.get_preparation(preparation_id)?;
        let chain = self.chain_to(&preparation.head_step_id)?;
        let position = step_position(&chain, step_id)?;
        let after = chain
            .iter()
            .position(|s| s.id == after_step_id)
            .ok_or_else(|| HistoryError::StepNotFound(after_step_id.to_string()))?;

        if after == position || after + 1 == position {
            debug!("Step already in place");
            return self.get_step(&preparation.head_step_id);
        }

        let mut own = own_actions(&chain);
        let moved = own.remove(position - 1);
        let insert_at = if after > position { after - 1 } else { after };
        own.insert(insert_at, moved);
        let first_changed = position.min(after + 1);
        self.rewrite(preparation, &chain, first_changed, own)
    }

    /// Point the head at an existing step without touching any step
    pub fn move_head(&self, preparation_id: &str, step_id: &str) -> HistoryResult<Preparation> {
        let _guard = self.lock()?;
        let mut preparation = self.get_preparation(preparation_id)?;
        self.chain_to(step_id)?;
        preparation.set_head(step_id);
        self.repository.add(Entity::Preparation(preparation.clone()))?;
        info!(preparation_id, step_id, "Moved head");
        Ok(preparation)
    }

    /// Rebuild the chain from `keep` onwards with `own` as the full list of
    /// per-step actions, then move the head to the new tip
    fn rewrite(
        &self,
        mut preparation: Preparation,
        old_chain: &[Step],
        keep: usize,
        own: Vec<Action>,
    ) -> HistoryResult<Step> {
        let chain_created: BTreeSet<String> = old_chain
            .iter()
            .flat_map(|s| s.created_column_ids.iter().cloned())
            .collect();
        let replay = self.replay_checked(&preparation, &own, &chain_created)?;

        let rebuilt = rehash(&old_chain[keep - 1], &own, keep - 1, &replay);
        for step in &rebuilt {
            self.repository.add(Entity::Step(step.clone()))?;
        }
        let head = rebuilt
            .last()
            .cloned()
            .unwrap_or_else(|| old_chain[keep - 1].clone());

        let new_ids: BTreeSet<&str> = rebuilt.iter().map(|s| s.id.as_str()).collect();
        let stale: Vec<&str> = old_chain[keep..]
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !new_ids.contains(id))
            .collect();
        self.release(&preparation, &stale);

        preparation.set_head(head.id.clone());
        self.repository.add(Entity::Preparation(preparation))?;
        info!(head = %head.id, rebuilt = rebuilt.len(), stale = stale.len(), "Rewrote step chain");
        Ok(head)
    }

    fn release(&self, preparation: &Preparation, stale: &[&str]) {
        for id in stale {
            if let Some(cache) = &self.cache {
                evict_or_warn(
                    cache.as_ref(),
                    &CacheKey::step_prefix(&preparation.dataset_id, &preparation.id, id),
                );
            }
            if let Some(updater) = &self.metadata {
                updater.invalidate(&preparation.dataset_id, id);
            }
        }
    }
}

impl std::fmt::Debug for HistoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEngine")
            .field("cache", &self.cache.is_some())
            .field("metadata", &self.metadata.is_some())
            .finish()
    }
}

/// Index of a non-root step in a chain
fn step_position(chain: &[Step], step_id: &str) -> HistoryResult<usize> {
    chain
        .iter()
        .position(|s| s.id == step_id)
        .filter(|&index| index > 0)
        .ok_or_else(|| HistoryError::StepNotFound(step_id.to_string()))
}

/// Each step's own action, root excluded
fn own_actions(chain: &[Step]) -> Vec<Action> {
    chain.iter().filter_map(|s| s.own_action().cloned()).collect()
}

/// New steps for actions `from..` of `own`, chained under `parent`
///
/// Every id depends on its parent's id, so the whole tail is recomputed in order.
pub fn rehash(parent: &Step, own: &[Action], from: usize, replay: &Replay) -> Vec<Step> {
    let mut parent_id = parent.id.clone();
    let mut steps = Vec::with_capacity(own.len().saturating_sub(from));
    for index in from..own.len() {
        let step = Step::new(parent_id, own[..=index].to_vec())
            .with_created_columns(replay.created_by(index).to_vec());
        parent_id = step.id.clone();
        steps.push(step);
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryContentCache, TimeToLive, CacheKind};
    use crate::history::{InMemoryDatasetProvider, InMemoryRepository};

    fn engine() -> (HistoryEngine, Preparation) {
        let datasets = InMemoryDatasetProvider::new();
        datasets
            .insert("ds", RowSchema::from_names(["toto", "tata", "foo"]), Vec::new())
            .unwrap();
        let engine = HistoryEngine::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(ActionRegistry::with_builtins()),
            Arc::new(datasets),
        );
        let prep = engine.create_preparation("ds", "cleanup", "alice").unwrap();
        (engine, prep)
    }

    fn own_names(engine: &HistoryEngine, prep: &str) -> Vec<String> {
        engine
            .list_steps(prep)
            .unwrap()
            .iter()
            .filter_map(|s| s.own_action().map(|a| format!("{}:{}", a.name, a.column_id().unwrap_or(""))))
            .collect()
    }

    #[test]
    fn test_append_records_created_columns() {
        let (engine, prep) = engine();
        let step = engine.append(&prep.id, Action::on_column("copy", "0000")).unwrap();
        assert_eq!(step.created_column_ids, ["0003".to_string()]);
        assert_eq!(engine.get_preparation(&prep.id).unwrap().head_step_id, step.id);
        assert!(step.is_consistent());
    }

    #[test]
    fn test_unknown_preparation_and_dataset() {
        let (engine, _) = engine();
        assert_eq!(
            engine.append("nope", Action::on_column("uppercase", "0000")).unwrap_err(),
            HistoryError::PreparationNotFound("nope".to_string())
        );
        assert_eq!(
            engine.create_preparation("missing", "x", "y").unwrap_err(),
            HistoryError::DatasetNotFound("missing".to_string())
        );
    }

    #[test]
    fn test_update_rehashes_descendants() {
        let (engine, prep) = engine();
        let s1 = engine.append(&prep.id, Action::on_column("uppercase", "0000")).unwrap();
        let s2 = engine.append(&prep.id, Action::on_column("uppercase", "0001")).unwrap();
        let s3 = engine.append(&prep.id, Action::on_column("uppercase", "0002")).unwrap();

        let head = engine
            .update(&prep.id, &s2.id, Action::on_column("delete_column", "0001"))
            .unwrap();

        let chain = engine.list_steps(&prep.id).unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[1].id, s1.id);
        assert_ne!(chain[2].id, s2.id);
        assert_ne!(chain[3].id, s3.id);
        assert_eq!(chain[3].id, head.id);
        assert!(chain.iter().all(Step::is_consistent));
        assert_eq!(
            own_names(&engine, &prep.id),
            ["uppercase:0000", "delete_column:0001", "uppercase:0002"]
        );
    }

    #[test]
    fn test_root_cannot_be_updated() {
        let (engine, prep) = engine();
        let err = engine
            .update(&prep.id, ROOT_STEP_ID, Action::on_column("uppercase", "0000"))
            .unwrap_err();
        assert_eq!(err, HistoryError::StepNotFound(ROOT_STEP_ID.to_string()));
    }

    #[test]
    fn test_delete_creator_is_rejected_before_mutation() {
        let (engine, prep) = engine();
        let copy = engine.append(&prep.id, Action::on_column("copy", "0000")).unwrap();
        let head = engine.append(&prep.id, Action::on_column("uppercase", "0003")).unwrap();

        let err = engine.delete(&prep.id, &copy.id).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidOrdering { action_index: 0, .. }));
        assert_eq!(engine.get_preparation(&prep.id).unwrap().head_step_id, head.id);
    }

    #[test]
    fn test_delete_splices_step() {
        let (engine, prep) = engine();
        engine.append(&prep.id, Action::on_column("uppercase", "0000")).unwrap();
        let s2 = engine.append(&prep.id, Action::on_column("uppercase", "0001")).unwrap();
        engine.append(&prep.id, Action::on_column("uppercase", "0002")).unwrap();

        engine.delete(&prep.id, &s2.id).unwrap();
        assert_eq!(own_names(&engine, &prep.id), ["uppercase:0000", "uppercase:0002"]);
    }

    #[test]
    fn test_move_step() {
        let (engine, prep) = engine();
        let a = engine.append(&prep.id, Action::on_column("uppercase", "0000")).unwrap();
        engine.append(&prep.id, Action::on_column("uppercase", "0001")).unwrap();
        let c = engine.append(&prep.id, Action::on_column("uppercase", "0002")).unwrap();

        engine.move_step(&prep.id, &c.id, ROOT_STEP_ID).unwrap();
        assert_eq!(
            own_names(&engine, &prep.id),
            ["uppercase:0002", "uppercase:0000", "uppercase:0001"]
        );

        let chain = engine.list_steps(&prep.id).unwrap();
        engine.move_step(&prep.id, &chain[1].id, &chain[3].id).unwrap();
        assert_eq!(
            own_names(&engine, &prep.id),
            ["uppercase:0000", "uppercase:0001", "uppercase:0002"]
        );
        assert_eq!(engine.list_steps(&prep.id).unwrap()[1].id, a.id);
    }

    #[test]
    fn test_move_before_creator_is_rejected() {
        let (engine, prep) = engine();
        engine.append(&prep.id, Action::on_column("copy", "0000")).unwrap();
        let user = engine.append(&prep.id, Action::on_column("uppercase", "0003")).unwrap();

        let err = engine.move_step(&prep.id, &user.id, ROOT_STEP_ID).unwrap_err();
        assert_eq!(
            err,
            HistoryError::InvalidOrdering {
                action_index: 0,
                action: "uppercase".to_string(),
                column_id: "0003".to_string(),
            }
        );
    }

    #[test]
    fn test_move_head_is_non_destructive() {
        let (engine, prep) = engine();
        let s1 = engine.append(&prep.id, Action::on_column("uppercase", "0000")).unwrap();
        let s2 = engine.append(&prep.id, Action::on_column("uppercase", "0001")).unwrap();

        engine.move_head(&prep.id, &s1.id).unwrap();
        assert_eq!(engine.list_steps(&prep.id).unwrap().len(), 2);
        engine.move_head(&prep.id, &s2.id).unwrap();
        assert_eq!(engine.list_steps(&prep.id).unwrap().len(), 3);

        assert!(engine.move_head(&prep.id, "unknown").unwrap_err().is_not_found());
    }

    #[test]
    fn test_stale_cache_entries_are_evicted() {
        let (engine, prep) = engine();
        let cache = Arc::new(InMemoryContentCache::default());
        let engine = engine.with_cache(cache.clone());
        let s1 = engine.append(&prep.id, Action::on_column("uppercase", "0000")).unwrap();

        let key = CacheKey::new("ds", CacheKind::Content)
            .with_preparation(prep.id.clone())
            .with_step(s1.id.clone());
        crate::cache::write_or_skip(cache.as_ref(), &key, TimeToLive::Default, b"rows");
        assert!(cache.has(&key).unwrap());

        engine
            .update(&prep.id, &s1.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        assert!(!cache.has(&key).unwrap());
    }

    #[test]
    fn test_delete_preparation_keeps_shared_steps() {
        let (engine, prep) = engine();
        let other = engine.create_preparation("ds", "other", "bob").unwrap();
        let shared = engine.append(&prep.id, Action::on_column("uppercase", "0000")).unwrap();
        engine.append(&other.id, Action::on_column("uppercase", "0000")).unwrap();
        engine.append(&prep.id, Action::on_column("uppercase", "0001")).unwrap();

        assert_eq!(engine.delete_preparation(&prep.id).unwrap(), 1);
        assert!(engine.get_step(&shared.id).is_ok());
        assert!(engine.get_preparation(&prep.id).unwrap_err().is_not_found());
        assert!(engine.get_step(ROOT_STEP_ID).is_ok());
    }
}
