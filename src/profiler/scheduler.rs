//! Per-action statistics scheduling
//!
//! Before an action that reads statistics (fill with the most frequent value, delete
//! invalid values, a filter on validity) the pipeline builder inserts analysis passes
//! so the action sees statistics of the rows as they are at that point.

use serde::Serialize;

use super::{AnalysisPlan, ColumnFilter};
use crate::analysis::AnalysisKind;
use crate::models::{Behavior, ResolvedAction};

/// One analysis pass inserted before an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatisticsPass {
    Type,
    Pattern,
    Quality,
    Frequency,
    /// Valid/invalid flags of every cell
    Invalid,
}

impl StatisticsPass {
    /// Analysis kinds the pass feeds its analyzer
    pub fn kinds(&self) -> &'static [AnalysisKind] {
        match self {
            StatisticsPass::Type => &[AnalysisKind::Type],
            StatisticsPass::Pattern => &[AnalysisKind::Pattern],
            StatisticsPass::Quality | StatisticsPass::Invalid => &[AnalysisKind::Quality],
            StatisticsPass::Frequency => &[AnalysisKind::Frequency],
        }
    }

    /// Column filter of `plan` the pass is restricted to
    pub fn column_filter<'a>(&self, plan: &'a AnalysisPlan) -> &'a ColumnFilter {
        match self {
            StatisticsPass::Pattern => &plan.pattern_analysis_column_filter,
            StatisticsPass::Invalid => &plan.invalid_analysis_column_filter,
            StatisticsPass::Type | StatisticsPass::Quality | StatisticsPass::Frequency => {
                &plan.full_analysis_column_filter
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatisticsPass::Type => "type",
            StatisticsPass::Pattern => "pattern",
            StatisticsPass::Quality => "quality",
            StatisticsPass::Frequency => "frequency",
            StatisticsPass::Invalid => "invalid",
        }
    }
}

/// Passes to run right before `action`, in execution order
///
/// Empty unless the action declares a `NEED_STATISTICS_*` tag or filters on cell
/// validity. Type detection always comes first; invalid detection always comes last
/// so it sees the final column types.
pub fn passes_for_action(action: &ResolvedAction) -> Vec<StatisticsPass> {
    let behavior = action.behavior();
    let filters_on_validity = action.action.filter_references_validity();
    let needs_statistics = behavior.iter().any(Behavior::needs_statistics) || filters_on_validity;
    if !needs_statistics {
        return Vec::new();
    }

    let mut passes = vec![StatisticsPass::Type];
    if behavior.contains(&Behavior::NeedStatisticsPattern) {
        passes.push(StatisticsPass::Pattern);
    }
    if behavior.contains(&Behavior::NeedStatisticsQuality) {
        passes.push(StatisticsPass::Quality);
    }
    if behavior.contains(&Behavior::NeedStatisticsFrequency) {
        passes.push(StatisticsPass::Frequency);
    }
    if behavior.contains(&Behavior::NeedStatisticsInvalid) || filters_on_validity {
        passes.push(StatisticsPass::Invalid);
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::models::{Action, params};

    fn passes(action: Action) -> Vec<StatisticsPass> {
        let resolved = ActionRegistry::with_builtins().resolve(&action).unwrap();
        passes_for_action(&resolved)
    }

    #[test]
    fn test_no_statistics_needed() {
        assert!(passes(Action::on_column("uppercase", "0000")).is_empty());
    }

    #[test]
    fn test_frequency_pass_after_type() {
        assert_eq!(
            passes(Action::on_column("fill_with_mode", "0000")),
            vec![StatisticsPass::Type, StatisticsPass::Frequency]
        );
    }

    #[test]
    fn test_invalid_pass_is_last() {
        assert_eq!(
            passes(Action::on_column("delete_invalid", "0000")),
            vec![StatisticsPass::Type, StatisticsPass::Invalid]
        );
    }

    #[test]
    fn test_validity_filter_triggers_invalid_pass() {
        let action = Action::on_column("uppercase", "0000")
            .with_param(params::FILTER, r#"{"valid": {"field": "0000"}}"#);
        assert_eq!(
            passes(action),
            vec![StatisticsPass::Type, StatisticsPass::Invalid]
        );
    }

    #[test]
    fn test_pass_kinds() {
        assert_eq!(StatisticsPass::Invalid.kinds(), &[AnalysisKind::Quality]);
        assert_eq!(StatisticsPass::Type.kinds(), &[AnalysisKind::Type]);
    }
}
