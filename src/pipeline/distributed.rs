//! Partitioned executor
//!
//! Rows are split into contiguous partitions, each run on its own [`Runtime`] (own
//! compiled actions, own analyzers) on the rayon pool. Statistics are merged per node
//! with [`crate::analysis::ColumnAnalysis::merge`], then re-applied to each sink's
//! schema before the sinks are finalized once. Row order across partitions is not
//! preserved and limits apply per partition. Pipelines whose actions depend on
//! statistics gathered before them are rejected, see [`Pipeline::is_partitionable`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use super::error::{PipelineError, PipelineResult};
use super::executor::{DEFAULT_BATCH_SIZE, ExecutionReport, Executor};
use super::graph::Pipeline;
use super::runtime::{
    RunOptions, RunOutcome, Runtime, StashedAnalysis, closing_signals, finalize_sink,
};
use super::signal::CancelFlag;
use crate::analysis::AnalyzerService;
use crate::models::{Row, RowSchema, RowStream};

/// Executor running partitions in parallel
#[derive(Clone)]
pub struct DistributedExecutor {
    analyzers: Arc<dyn AnalyzerService>,
    partitions: usize,
    batch_size: usize,
}

impl DistributedExecutor {
    pub fn new(analyzers: Arc<dyn AnalyzerService>, partitions: usize) -> Self {
        Self {
            analyzers,
            partitions: partitions.max(1),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    fn run_partition(
        &self,
        pipeline: &Pipeline,
        schema: RowSchema,
        rows: Vec<Row>,
        cancel: &CancelFlag,
    ) -> PipelineResult<RunOutcome> {
        let options = RunOptions {
            batch_size: self.batch_size,
            partitioned: true,
        };
        let mut runtime = Runtime::new(pipeline, schema, Arc::clone(&self.analyzers), options);
        for row in rows {
            if cancel.is_cancelled() {
                runtime.cancel();
                break;
            }
            runtime.push(row)?;
        }
        runtime.finish()
    }
}

/// Split `rows` into `count` contiguous chunks of near-equal size
fn partition(rows: Vec<Row>, count: usize) -> Vec<Vec<Row>> {
    let size = rows.len().div_ceil(count.max(1)).max(1);
    let mut chunks = Vec::with_capacity(count);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        chunks.push(rows.by_ref().take(size).collect());
    }
    if chunks.is_empty() {
        chunks.push(Vec::new());
    }
    chunks
}

fn merge_stashed(outcomes: &[RunOutcome]) -> BTreeMap<usize, StashedAnalysis> {
    let mut merged: BTreeMap<usize, StashedAnalysis> = BTreeMap::new();
    for outcome in outcomes {
        for (node, stashed) in &outcome.stashed {
            match merged.get_mut(node) {
                Some(existing) => existing.merge(stashed),
                None => {
                    merged.insert(*node, stashed.clone());
                }
            }
        }
    }
    merged
}

impl Executor for DistributedExecutor {
    fn name(&self) -> &'static str {
        "distributed"
    }

    fn execute_with_cancel(
        &self,
        pipeline: &Pipeline,
        input: RowStream,
        cancel: &CancelFlag,
    ) -> PipelineResult<ExecutionReport> {
        pipeline.validate()?;
        if pipeline.has_interrupt_filter() {
            return Err(PipelineError::unsupported(
                "interrupt-mode filters depend on row order; use the streaming executor",
            ));
        }
        if pipeline.has_mid_pipeline_analysis() {
            return Err(PipelineError::unsupported(
                "statistics needed before an action span the whole input; use the streaming executor",
            ));
        }
        let run_id = Uuid::new_v4().to_string();
        let _span = info_span!(
            "pipeline_run",
            run_id = %run_id,
            executor = self.name(),
            partitions = self.partitions
        )
        .entered();
        let start = Instant::now();

        let (schema, rows) = input.into_parts();
        let chunks = partition(rows.collect(), self.partitions);
        let partitions = chunks.len();
        debug!(partitions, "Partitioned input");

        let outcomes = chunks
            .into_par_iter()
            .map(|chunk| self.run_partition(pipeline, schema.clone(), chunk, cancel))
            .collect::<PipelineResult<Vec<_>>>()?;

        let merged = merge_stashed(&outcomes);
        let cancelled = outcomes.iter().any(|o| o.cancelled);
        let signals = closing_signals(cancelled, false);

        for sink in pipeline.sinks() {
            let mut sink_schema = outcomes
                .iter()
                .find_map(|o| o.sink_schemas.get(&sink.index()).cloned())
                .unwrap_or_else(|| schema.clone());
            for analysis in pipeline.upstream_analyses(sink) {
                if let Some(stashed) = merged.get(&analysis.index()) {
                    stashed.apply(&mut sink_schema);
                }
            }
            finalize_sink(pipeline.node(sink), &signals, &sink_schema)?;
        }

        let mut final_schema = outcomes
            .first()
            .map(|o| o.schema.clone())
            .unwrap_or(schema);
        for node in pipeline.main_lane() {
            if let Some(stashed) = merged.get(&node.index()) {
                stashed.apply(&mut final_schema);
            }
        }

        let rows_read: u64 = outcomes.iter().map(|o| o.rows_read).sum();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            rows = rows_read,
            partitions,
            cancelled,
            duration_ms,
            "Pipeline run finished"
        );

        Ok(ExecutionReport {
            run_id,
            executor: self.name(),
            rows_read,
            stopped: false,
            cancelled,
            partitions,
            schema: final_schema,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisKind, BasicAnalyzerService};
    use crate::models::{ColumnType, FilterExpr};
    use crate::pipeline::node::{FilterMode, Node};
    use crate::pipeline::writer::CollectHandle;
    use crate::profiler::ColumnFilter;

    fn numbers(n: u64) -> RowStream {
        let rows: Vec<Row> = (0..n)
            .map(|i| Row::from_values(i, [("0000", (i * 10).to_string())]))
            .collect();
        RowStream::new(RowSchema::from_names(["n"]), rows)
    }

    fn statistics_pipeline(collect: &CollectHandle) -> Pipeline {
        let mut pipeline = Pipeline::new(Vec::new());
        let stats = pipeline.append(
            pipeline.root(),
            Node::Statistics {
                filter: ColumnFilter::default(),
                kinds: AnalysisKind::all(),
                hold_rows: false,
            },
        );
        pipeline.append(stats, Node::Collect(collect.clone()));
        pipeline
    }

    #[test]
    fn test_partition_sizes() {
        let rows: Vec<Row> = (0..10).map(Row::new).collect();
        let chunks = partition(rows, 3);
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(partition(Vec::new(), 4).len(), 1);
    }

    #[test]
    fn test_statistics_independent_of_partition_count() {
        let mut results = Vec::new();
        for partitions in [1, 2, 5] {
            let collect = CollectHandle::new();
            let pipeline = statistics_pipeline(&collect);
            let executor =
                DistributedExecutor::new(Arc::new(BasicAnalyzerService), partitions).with_batch_size(3);
            let report = executor.execute(&pipeline, numbers(20)).unwrap();
            assert_eq!(report.rows_read, 20);
            assert_eq!(collect.len(), 20);
            let schema = collect.schema().unwrap();
            let column = schema.columns()[0].clone();
            assert_eq!(column.column_type, ColumnType::Integer);
            assert_eq!(column.statistics.count, 20);
            assert_eq!(column.statistics.valid, 20);
            assert_eq!(report.schema.columns()[0].statistics.count, 20);
            results.push(column.statistics);
        }
        for statistics in &results[1..] {
            assert_eq!(statistics.distinct_count, results[0].distinct_count);
            assert_eq!(statistics.min, results[0].min);
            assert_eq!(statistics.max, results[0].max);
            let mean = statistics.mean.unwrap();
            assert!((mean - results[0].mean.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_interrupt_filter_rejected() {
        let mut pipeline = Pipeline::new(Vec::new());
        pipeline.append(
            pipeline.root(),
            Node::Filter {
                filter: FilterExpr::parse(r#"{"empty": {"field": "0000"}}"#).unwrap(),
                mode: FilterMode::Interrupt,
            },
        );
        let executor = DistributedExecutor::new(Arc::new(BasicAnalyzerService), 2);
        assert!(matches!(
            executor.execute(&pipeline, numbers(3)),
            Err(PipelineError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_held_statistics_rejected() {
        let mut pipeline = Pipeline::new(Vec::new());
        let stats = pipeline.append(
            pipeline.root(),
            Node::Statistics {
                filter: ColumnFilter::default(),
                kinds: vec![AnalysisKind::Type],
                hold_rows: true,
            },
        );
        let collect = CollectHandle::new();
        pipeline.append(stats, Node::Collect(collect.clone()));

        let executor = DistributedExecutor::new(Arc::new(BasicAnalyzerService), 2);
        assert!(matches!(
            executor.execute(&pipeline, numbers(3)),
            Err(PipelineError::UnsupportedOperation(_))
        ));
        assert!(collect.is_empty());
    }
}
