//! Pipeline node kinds
//!
//! Nodes are plain descriptions; their per-run state lives in the runtime, so one
//! [`super::Pipeline`] can be executed any number of times, including once per
//! partition in parallel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::writer::{CollectHandle, WriteHandle};
use crate::analysis::AnalysisKind;
use crate::history::StepMetadataUpdater;
use crate::models::FilterExpr;
use crate::profiler::ColumnFilter;

/// What a [`Node::Filter`] does with a row failing its predicate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Drop the row, keep reading
    #[default]
    Drop,
    /// Drop the row and stop the run (first N matching rows)
    Interrupt,
}

/// One node of the pipeline graph
#[derive(Debug, Clone)]
pub enum Node {
    /// Entry point, receives the source rows
    Source,
    /// Compiles the action at `action_index` on first use
    Compile { action_index: usize },
    /// Applies the compiled action at `action_index`
    Action { action_index: usize },
    Filter { filter: FilterExpr, mode: FilterMode },
    /// Fans rows out to every child; child 0 keeps the schema, the others get copies
    Branch,
    /// Passes the first `limit` rows, drops the rest
    Limit { limit: u64 },
    /// Feeds the selected columns to an analyzer and commits at end of stream
    ///
    /// With `hold_rows`, rows are held back and released after the commit, so the
    /// next node sees statistics covering every row. A Stop commits and releases
    /// them before it is passed on.
    Statistics {
        filter: ColumnFilter,
        kinds: Vec<AnalysisKind>,
        hold_rows: bool,
    },
    /// Marks invalid cells and recomputes valid/invalid/empty counts only
    InvalidDetection { filter: ColumnFilter },
    /// Reconciles column type and semantic domain after type changes
    DomainEnforcement,
    /// Hands the final schema of `step_id` run on `dataset_id` to the metadata updater
    StepMetadata {
        dataset_id: String,
        step_id: String,
        updater: Arc<StepMetadataUpdater>,
    },
    Write(WriteHandle),
    Collect(CollectHandle),
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Source => "source",
            Node::Compile { .. } => "compile",
            Node::Action { .. } => "action",
            Node::Filter { .. } => "filter",
            Node::Branch => "branch",
            Node::Limit { .. } => "limit",
            Node::Statistics { .. } => "statistics",
            Node::InvalidDetection { .. } => "invalid_detection",
            Node::DomainEnforcement => "domain_enforcement",
            Node::StepMetadata { .. } => "step_metadata",
            Node::Write(_) => "write",
            Node::Collect(_) => "collect",
        }
    }

    /// Nodes finalized with the end-of-run schema
    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            Node::Write(_) | Node::Collect(_) | Node::StepMetadata { .. }
        )
    }

    /// Nodes producing statistics that a distributed run merges across partitions
    pub fn is_analysis(&self) -> bool {
        matches!(self, Node::Statistics { .. } | Node::InvalidDetection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::writer::JsonRowWriter;

    #[test]
    fn test_node_classification() {
        assert!(Node::Write(WriteHandle::new(JsonRowWriter::new(Vec::new()))).is_sink());
        assert!(Node::Collect(CollectHandle::new()).is_sink());
        assert!(!Node::Limit { limit: 3 }.is_sink());
        assert!(
            Node::InvalidDetection {
                filter: ColumnFilter::default()
            }
            .is_analysis()
        );
        assert_eq!(Node::Branch.name(), "branch");
    }
}
