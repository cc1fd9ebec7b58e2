//! Pipeline composition from an action list and its analysis plan
//!
//! Layout of the main chain:
//!
//! ```text
//! source → [filter] → per action: [analysis passes] → compile → action → [domain]
//!        → [limit] → [final analysis] → [write] → [collect] → [step metadata]
//! ```
//!
//! A preview adds a branch after the limit; its second lane is `limit → collect`.

use std::sync::Arc;

use petgraph::graph::NodeIndex;
use tracing::debug;

use super::error::PipelineResult;
use super::graph::Pipeline;
use super::node::{FilterMode, Node};
use super::writer::{CollectHandle, WriteHandle};
use crate::analysis::AnalysisKind;
use crate::history::StepMetadataUpdater;
use crate::models::{Behavior, FilterExpr, ResolvedAction};
use crate::profiler::{AnalysisPlan, StatisticsPass, passes_for_action};

/// Builds a [`Pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    actions: Vec<ResolvedAction>,
    plan: AnalysisPlan,
    filter: Option<(FilterExpr, FilterMode)>,
    limit: Option<u64>,
    writer: Option<WriteHandle>,
    collect: Option<CollectHandle>,
    step_metadata: Option<(String, String, Arc<StepMetadataUpdater>)>,
    preview: Option<(CollectHandle, u64)>,
    final_analysis: bool,
}

impl PipelineBuilder {
    pub fn new(actions: Vec<ResolvedAction>, plan: AnalysisPlan) -> Self {
        Self {
            actions,
            plan,
            filter: None,
            limit: None,
            writer: None,
            collect: None,
            step_metadata: None,
            preview: None,
            final_analysis: true,
        }
    }

    /// Filter source rows before the first action
    pub fn with_filter(mut self, filter: FilterExpr, mode: FilterMode) -> Self {
        self.filter = Some((filter, mode));
        self
    }

    /// Keep only the first `limit` rows after the last action
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_writer(mut self, writer: WriteHandle) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_collect(mut self, collect: CollectHandle) -> Self {
        self.collect = Some(collect);
        self
    }

    /// Record the final schema as the metadata of `step_id` on `dataset_id`
    pub fn with_step_metadata(
        mut self,
        dataset_id: impl Into<String>,
        step_id: impl Into<String>,
        updater: Arc<StepMetadataUpdater>,
    ) -> Self {
        self.step_metadata = Some((dataset_id.into(), step_id.into(), updater));
        self
    }

    /// Collect up to `limit` rows on a separate lane, next to the main chain
    pub fn with_preview(mut self, collect: CollectHandle, limit: u64) -> Self {
        self.preview = Some((collect, limit));
        self
    }

    /// Skip the end-of-chain statistics even if the plan asks for them
    pub fn without_final_analysis(mut self) -> Self {
        self.final_analysis = false;
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        let mut pipeline = Pipeline::new(self.actions.clone());
        let mut tail = pipeline.root();

        if let Some((filter, mode)) = self.filter.clone() {
            tail = pipeline.append(tail, Node::Filter { filter, mode });
        }

        for (index, action) in self.actions.iter().enumerate() {
            for pass in passes_for_action(action) {
                tail = pipeline.append(tail, self.pass_node(pass));
            }
            tail = pipeline.append(tail, Node::Compile { action_index: index });
            tail = pipeline.append(tail, Node::Action { action_index: index });
            if action.behavior().contains(&Behavior::MetadataChangeType) {
                tail = pipeline.append(tail, Node::DomainEnforcement);
            }
        }

        if let Some(limit) = self.limit {
            tail = pipeline.append(tail, Node::Limit { limit });
        }

        if let Some((collect, limit)) = &self.preview {
            let branch = pipeline.append(tail, Node::Branch);
            let main = self.main_lane(&mut pipeline, branch);
            let preview = pipeline.append(branch, Node::Limit { limit: *limit });
            pipeline.append(preview, Node::Collect(collect.clone()));
            debug!(main_tail = main.index(), "Added preview lane");
        } else {
            self.main_lane(&mut pipeline, tail);
        }

        pipeline.validate()?;
        debug!(
            actions = self.actions.len(),
            nodes = pipeline.node_count(),
            need_full_analysis = self.plan.need_full_analysis,
            need_invalid_only_analysis = self.plan.need_invalid_only_analysis,
            "Built pipeline"
        );
        Ok(pipeline)
    }

    fn pass_node(&self, pass: StatisticsPass) -> Node {
        let filter = pass.column_filter(&self.plan).clone();
        match pass {
            StatisticsPass::Invalid => Node::InvalidDetection { filter },
            _ => Node::Statistics {
                filter,
                kinds: pass.kinds().to_vec(),
                hold_rows: true,
            },
        }
    }

    /// Final analysis and sinks; returns the last node of the chain
    fn main_lane(&self, pipeline: &mut Pipeline, mut tail: NodeIndex) -> NodeIndex {
        if self.final_analysis {
            if self.plan.need_full_analysis {
                tail = pipeline.append(
                    tail,
                    Node::Statistics {
                        filter: self.plan.full_analysis_column_filter.clone(),
                        kinds: AnalysisKind::all(),
                        hold_rows: false,
                    },
                );
            } else if self.plan.need_invalid_only_analysis {
                tail = pipeline.append(
                    tail,
                    Node::InvalidDetection {
                        filter: self.plan.invalid_analysis_column_filter.clone(),
                    },
                );
            }
        }
        if let Some(writer) = &self.writer {
            tail = pipeline.append(tail, Node::Write(writer.clone()));
        }
        if let Some(collect) = &self.collect {
            tail = pipeline.append(tail, Node::Collect(collect.clone()));
        }
        if let Some((dataset_id, step_id, updater)) = &self.step_metadata {
            tail = pipeline.append(
                tail,
                Node::StepMetadata {
                    dataset_id: dataset_id.clone(),
                    step_id: step_id.clone(),
                    updater: Arc::clone(updater),
                },
            );
        }
        tail
    }
}
