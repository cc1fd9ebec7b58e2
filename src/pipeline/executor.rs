//! Pipeline executors
//!
//! [`StreamingExecutor`] runs one row at a time, in source order, on the calling
//! thread: statistics see rows in a stable order and limits are exact.
//! [`super::DistributedExecutor`] trades ordering for partition parallelism.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use super::error::PipelineResult;
use super::graph::Pipeline;
use super::runtime::{RunOptions, Runtime};
use super::signal::CancelFlag;
use crate::analysis::AnalyzerService;
use crate::models::{RowStream, RowSchema};

/// Default number of rows buffered before an analyzer is fed
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: String,
    pub executor: &'static str,
    /// Source rows admitted into the graph
    pub rows_read: u64,
    /// An interrupt filter stopped the run
    pub stopped: bool,
    pub cancelled: bool,
    pub partitions: usize,
    /// Main-lane schema at the end of the run
    pub schema: RowSchema,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// Check the run went through every source row
    pub fn is_complete(&self) -> bool {
        !self.stopped && !self.cancelled
    }
}

/// Runs a [`Pipeline`] over a [`RowStream`]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run to completion, checking `cancel` between rows
    fn execute_with_cancel(
        &self,
        pipeline: &Pipeline,
        input: RowStream,
        cancel: &CancelFlag,
    ) -> PipelineResult<ExecutionReport>;

    fn execute(&self, pipeline: &Pipeline, input: RowStream) -> PipelineResult<ExecutionReport> {
        self.execute_with_cancel(pipeline, input, &CancelFlag::new())
    }
}

/// Single-threaded, row-by-row executor
#[derive(Clone)]
pub struct StreamingExecutor {
    analyzers: Arc<dyn AnalyzerService>,
    batch_size: usize,
}

impl StreamingExecutor {
    pub fn new(analyzers: Arc<dyn AnalyzerService>) -> Self {
        Self {
            analyzers,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Executor for StreamingExecutor {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn execute_with_cancel(
        &self,
        pipeline: &Pipeline,
        input: RowStream,
        cancel: &CancelFlag,
    ) -> PipelineResult<ExecutionReport> {
        pipeline.validate()?;
        let run_id = Uuid::new_v4().to_string();
        let _span = info_span!(
            "pipeline_run",
            run_id = %run_id,
            executor = self.name(),
            nodes = pipeline.node_count()
        )
        .entered();
        let start = Instant::now();

        let (schema, rows) = input.into_parts();
        let options = RunOptions {
            batch_size: self.batch_size,
            partitioned: false,
        };
        let mut runtime = Runtime::new(pipeline, schema, Arc::clone(&self.analyzers), options);
        for row in rows {
            if cancel.is_cancelled() {
                runtime.cancel();
                break;
            }
            if runtime.is_stopped() {
                break;
            }
            runtime.push(row)?;
        }
        let outcome = runtime.finish()?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            rows = outcome.rows_read,
            stopped = outcome.stopped,
            cancelled = outcome.cancelled,
            duration_ms,
            "Pipeline run finished"
        );

        Ok(ExecutionReport {
            run_id,
            executor: self.name(),
            rows_read: outcome.rows_read,
            stopped: outcome.stopped,
            cancelled: outcome.cancelled,
            partitions: 1,
            schema: outcome.schema,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::analysis::BasicAnalyzerService;
    use crate::models::{Action, FilterExpr, Row};
    use crate::pipeline::node::{FilterMode, Node};
    use crate::pipeline::writer::CollectHandle;
    use crate::pipeline::Signal;

    fn executor() -> StreamingExecutor {
        StreamingExecutor::new(Arc::new(BasicAnalyzerService)).with_batch_size(2)
    }

    fn input() -> RowStream {
        let schema = crate::models::RowSchema::from_names(["name"]);
        let rows = ["ada", "alan", "grace"]
            .into_iter()
            .enumerate()
            .map(|(i, v)| Row::from_values(i as u64, [("0000", v)]));
        RowStream::new(schema, rows)
    }

    #[test]
    fn test_action_applied_in_order() {
        let registry = ActionRegistry::with_builtins();
        let actions = registry
            .resolve_all(&[Action::on_column("uppercase", "0000")])
            .unwrap();
        let mut pipeline = Pipeline::new(actions);
        let compile = pipeline.append(pipeline.root(), Node::Compile { action_index: 0 });
        let action = pipeline.append(compile, Node::Action { action_index: 0 });
        let collect = CollectHandle::new();
        pipeline.append(action, Node::Collect(collect.clone()));

        let report = executor().execute(&pipeline, input()).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.rows_read, 3);
        let values: Vec<String> = collect
            .rows()
            .iter()
            .map(|r| r.get("0000").unwrap_or_default().to_string())
            .collect();
        assert_eq!(values, vec!["ADA", "ALAN", "GRACE"]);
        assert_eq!(collect.signals(), vec![Signal::EndOfStream]);
    }

    #[test]
    fn test_cancelled_before_first_row() {
        let mut pipeline = Pipeline::new(Vec::new());
        let collect = CollectHandle::new();
        pipeline.append(pipeline.root(), Node::Collect(collect.clone()));

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = executor()
            .execute_with_cancel(&pipeline, input(), &cancel)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.rows_read, 0);
        assert!(collect.is_empty());
        assert_eq!(collect.signals(), vec![Signal::Cancel, Signal::EndOfStream]);
    }

    #[test]
    fn test_interrupt_filter_reports_stop() {
        let mut pipeline = Pipeline::new(Vec::new());
        let filter = FilterExpr::parse(r#"{"not": {"eq": {"field": "0000", "value": "grace"}}}"#).unwrap();
        let node = pipeline.append(
            pipeline.root(),
            Node::Filter {
                filter,
                mode: FilterMode::Interrupt,
            },
        );
        let collect = CollectHandle::new();
        pipeline.append(node, Node::Collect(collect.clone()));

        let report = executor().execute(&pipeline, input()).unwrap();
        assert!(report.stopped);
        assert_eq!(collect.len(), 2);
        assert_eq!(collect.signals(), vec![Signal::Stop, Signal::EndOfStream]);
    }
}
