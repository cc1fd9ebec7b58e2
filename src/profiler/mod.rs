//! Action behavior profiler
//!
//! Static analysis of a step's action list: from each action's declared [`Behavior`]
//! tags, decide which columns need a full re-analysis, which only need their
//! valid/invalid flags recomputed, and which actions need fresh statistics right before
//! they run (see [`scheduler`]).

pub mod scheduler;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::models::{Behavior, BehaviorSet, Column, ResolvedAction, RowSchema};

pub use scheduler::{StatisticsPass, passes_for_action};

/// Accepts the columns an analysis pass must (re)compute
///
/// A column is accepted when it is explicitly selected, or when it is not part of the
/// original column set (created by an action, so it has no prior statistics).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnFilter {
    original: BTreeSet<String>,
    selected: BTreeSet<String>,
}

impl ColumnFilter {
    pub fn new(original: BTreeSet<String>, selected: BTreeSet<String>) -> Self {
        Self { original, selected }
    }

    pub fn accepts(&self, column_id: &str) -> bool {
        self.selected.contains(column_id) || !self.original.contains(column_id)
    }

    /// Accepted columns of `schema`, in schema order
    pub fn select<'a>(&self, schema: &'a RowSchema) -> Vec<&'a Column> {
        schema
            .columns()
            .iter()
            .filter(|c| self.accepts(&c.id))
            .collect()
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }
}

/// Profiler decision for one step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPlan {
    pub need_full_analysis: bool,
    pub need_invalid_only_analysis: bool,
    pub full_analysis_column_filter: ColumnFilter,
    pub invalid_analysis_column_filter: ColumnFilter,
    pub pattern_analysis_column_filter: ColumnFilter,
    /// Behavior tags of each action, by position in the action list
    pub behavior_by_action: BTreeMap<usize, BehaviorSet>,
}

impl AnalysisPlan {
    /// Whether any statistics must be recomputed at the end of the pipeline
    pub fn requires_analysis(&self) -> bool {
        self.need_full_analysis || self.need_invalid_only_analysis
    }

    pub fn behavior(&self, action_index: usize) -> Option<&BehaviorSet> {
        self.behavior_by_action.get(&action_index)
    }
}

/// Builds [`AnalysisPlan`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionProfiler;

impl ActionProfiler {
    pub fn new() -> Self {
        Self
    }

    /// Profile `actions` run against `schema` (the schema before the first action)
    pub fn profile(&self, actions: &[ResolvedAction], schema: &RowSchema) -> AnalysisPlan {
        let original: BTreeSet<String> = schema.ids().map(str::to_string).collect();
        let mut value_modified = BTreeSet::new();
        let mut metadata_modified = BTreeSet::new();
        let mut create_column = false;
        let mut behavior_by_action = BTreeMap::new();

        for (index, action) in actions.iter().enumerate() {
            let behavior = action.behavior();
            let target = action.action.column_id().map(str::to_string);

            for tag in &behavior {
                match tag {
                    Behavior::ValuesAll => value_modified.extend(original.iter().cloned()),
                    Behavior::ValuesColumn => value_modified.extend(target.clone()),
                    Behavior::MetadataChangeType => {
                        value_modified.extend(target.clone());
                        metadata_modified.extend(target.clone());
                    }
                    Behavior::ValuesMultipleColumns => {
                        value_modified.extend(action.referenced_columns());
                    }
                    Behavior::MetadataCreateColumns | Behavior::MetadataCopyColumns => {
                        create_column = true;
                    }
                    Behavior::MetadataDeleteColumns
                    | Behavior::MetadataChangeName
                    | Behavior::NeedStatisticsPattern
                    | Behavior::NeedStatisticsInvalid
                    | Behavior::NeedStatisticsQuality
                    | Behavior::NeedStatisticsFrequency => {}
                }
            }
            if action.action.creates_new_column() {
                create_column = true;
            }
            behavior_by_action.insert(index, behavior);
        }

        let need_full_analysis = !value_modified.is_empty() || create_column;
        let need_invalid_only_analysis = !need_full_analysis && !metadata_modified.is_empty();

        let invalid_selected = value_modified.union(&metadata_modified).cloned().collect();
        let plan = AnalysisPlan {
            need_full_analysis,
            need_invalid_only_analysis,
            full_analysis_column_filter: ColumnFilter::new(original.clone(), value_modified.clone()),
            invalid_analysis_column_filter: ColumnFilter::new(original.clone(), invalid_selected),
            pattern_analysis_column_filter: ColumnFilter::new(original, value_modified),
            behavior_by_action,
        };

        debug!(
            actions = actions.len(),
            need_full_analysis = plan.need_full_analysis,
            need_invalid_only_analysis = plan.need_invalid_only_analysis,
            "Profiled action list"
        );
        plan
    }
}
