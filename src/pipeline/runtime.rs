//! Live state of one pipeline run
//!
//! A [`Runtime`] pairs every graph node with its per-run state and drives rows and
//! signals depth-first from the root. It runs on one thread; parallel execution
//! creates one runtime per partition.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use tracing::debug;

use super::error::{PipelineError, PipelineResult};
use super::graph::Pipeline;
use super::node::{FilterMode, Node};
use super::signal::Signal;
use crate::analysis::{AnalysisKind, Analyzer, AnalyzerService, ColumnAnalysis};
use crate::models::{Column, CompiledAction, FilterExpr, Row, RowSchema, ScopeKind};
use crate::profiler::ColumnFilter;

/// Analysis results a statistics or invalid-detection node committed
#[derive(Debug, Clone)]
pub(crate) struct StashedAnalysis {
    pub kinds: Vec<AnalysisKind>,
    pub invalid_only: bool,
    pub results: Vec<ColumnAnalysis>,
}

impl StashedAnalysis {
    /// Fold the results of the same node from another partition
    pub fn merge(&mut self, other: &StashedAnalysis) {
        for result in &other.results {
            match self
                .results
                .iter_mut()
                .find(|r| r.column_id == result.column_id)
            {
                Some(existing) => existing.merge(result),
                None => self.results.push(result.clone()),
            }
        }
    }

    pub fn apply(&self, schema: &mut RowSchema) {
        for result in &self.results {
            if let Some(column) = schema.column_mut(&result.column_id) {
                if self.invalid_only {
                    result.apply_validity(column);
                } else {
                    result.apply_to(column, &self.kinds);
                }
            }
        }
    }
}

/// Settings of one run
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunOptions {
    pub batch_size: usize,
    /// Sinks stash their schema instead of finalizing; the executor finalizes them
    /// once partition results are merged
    pub partitioned: bool,
}

/// What a finished runtime leaves behind
#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub rows_read: u64,
    pub stopped: bool,
    pub cancelled: bool,
    pub schema: RowSchema,
    pub stashed: BTreeMap<usize, StashedAnalysis>,
    pub sink_schemas: BTreeMap<usize, RowSchema>,
}

struct CompiledEntry {
    action: Box<dyn CompiledAction>,
    scope: ScopeKind,
    filter: Option<FilterExpr>,
    row_id: Option<u64>,
}

impl CompiledEntry {
    fn applies_to(&self, row: &Row, schema: &RowSchema) -> bool {
        if self.scope == ScopeKind::Cell && self.row_id != Some(row.tdp_id) {
            return false;
        }
        self.filter.as_ref().is_none_or(|f| f.matches(row, schema))
    }
}

#[derive(Default)]
struct AnalysisState {
    analyzer: Option<Box<dyn Analyzer>>,
    columns: Vec<String>,
    buffer: Vec<Vec<Option<String>>>,
    held: Vec<Row>,
    discarded: bool,
    committed: bool,
}

impl AnalysisState {
    fn discard(&mut self) {
        self.analyzer = None;
        self.buffer.clear();
        self.held.clear();
        self.discarded = true;
    }
}

enum NodeState {
    Stateless,
    Compile { compiled: bool },
    Limit { passed: u64 },
    Branch { copied: bool },
    Analysis(AnalysisState),
    Domain { enforced: bool },
    Sink { received: Vec<Signal> },
}

struct Slot {
    lane: usize,
    children: Vec<usize>,
    state: NodeState,
}

/// Per-run state shared by every node
struct RunContext {
    /// One schema per lane; lane 0 starts from the source schema
    schemas: Vec<RowSchema>,
    compiled: HashMap<usize, CompiledEntry>,
    stopped: bool,
    cancelled: bool,
    analyzers: Arc<dyn AnalyzerService>,
    options: RunOptions,
    stashed: BTreeMap<usize, StashedAnalysis>,
    sink_schemas: BTreeMap<usize, RowSchema>,
}

pub(crate) struct Runtime<'p> {
    pipeline: &'p Pipeline,
    slots: Vec<Slot>,
    ctx: RunContext,
    rows_read: u64,
}

impl<'p> Runtime<'p> {
    pub fn new(
        pipeline: &'p Pipeline,
        schema: RowSchema,
        analyzers: Arc<dyn AnalyzerService>,
        options: RunOptions,
    ) -> Self {
        let mut slots: Vec<Slot> = pipeline
            .node_indices()
            .map(|index| Slot {
                lane: 0,
                children: pipeline
                    .children(index)
                    .into_iter()
                    .map(|c| c.index())
                    .collect(),
                state: initial_state(pipeline.node(index)),
            })
            .collect();

        // Lanes: a branch's first child keeps the parent's lane, the others get new ones
        let mut lanes = 1;
        let mut stack = vec![pipeline.root().index()];
        while let Some(index) = stack.pop() {
            let lane = slots[index].lane;
            let is_branch = matches!(pipeline.node(NodeIndex::new(index)), Node::Branch);
            for (position, child) in slots[index].children.clone().into_iter().enumerate() {
                slots[child].lane = if is_branch && position > 0 {
                    lanes += 1;
                    lanes - 1
                } else {
                    lane
                };
                stack.push(child);
            }
        }

        let mut schemas = vec![RowSchema::default(); lanes];
        schemas[0] = schema;

        Self {
            pipeline,
            slots,
            ctx: RunContext {
                schemas,
                compiled: HashMap::new(),
                stopped: false,
                cancelled: false,
                analyzers,
                options,
                stashed: BTreeMap::new(),
                sink_schemas: BTreeMap::new(),
            },
            rows_read: 0,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.stopped
    }

    /// Stop admitting rows and suppress further emission
    pub fn cancel(&mut self) {
        self.ctx.cancelled = true;
    }

    /// Feed one source row
    pub fn push(&mut self, row: Row) -> PipelineResult<()> {
        self.rows_read += 1;
        let root = self.pipeline.root().index();
        self.push_row(root, row)
    }

    /// Send the closing signals and return what the run produced
    pub fn finish(mut self) -> PipelineResult<RunOutcome> {
        let root = self.pipeline.root().index();
        for signal in self.closing_signals() {
            debug!(signal = %signal, "Propagating signal");
            self.push_signal(root, signal)?;
        }
        Ok(RunOutcome {
            rows_read: self.rows_read,
            stopped: self.ctx.stopped,
            cancelled: self.ctx.cancelled,
            schema: self.ctx.schemas.swap_remove(0),
            stashed: self.ctx.stashed,
            sink_schemas: self.ctx.sink_schemas,
        })
    }

    fn closing_signals(&self) -> Vec<Signal> {
        closing_signals(self.ctx.cancelled, self.ctx.stopped)
    }

    fn forward(&mut self, index: usize, row: Row) -> PipelineResult<()> {
        let children = self.slots[index].children.clone();
        let Some((last, rest)) = children.split_last() else {
            return Ok(());
        };
        for child in rest {
            self.push_row(*child, row.clone())?;
        }
        self.push_row(*last, row)
    }

    fn push_row(&mut self, index: usize, mut row: Row) -> PipelineResult<()> {
        if self.ctx.cancelled {
            return Ok(());
        }
        let pipeline = self.pipeline;
        let lane = self.slots[index].lane;

        match pipeline.node(NodeIndex::new(index)) {
            Node::Source | Node::StepMetadata { .. } => self.forward(index, row),
            Node::Compile { action_index } => {
                self.ensure_compiled(index, *action_index)?;
                self.forward(index, row)
            }
            Node::Action { action_index } => {
                let name = pipeline.actions()[*action_index].name();
                let ctx = &mut self.ctx;
                let entry = ctx.compiled.get_mut(action_index).ok_or_else(|| {
                    PipelineError::invalid_graph(format!("action #{action_index} not compiled"))
                })?;
                let schema = &ctx.schemas[lane];
                let outputs = if row.is_deleted() || !entry.applies_to(&row, schema) {
                    vec![row]
                } else {
                    entry
                        .action
                        .apply(row, schema)
                        .map_err(|e| PipelineError::action(name, e))?
                };
                for output in outputs {
                    if self.ctx.cancelled {
                        break;
                    }
                    self.forward(index, output)?;
                }
                Ok(())
            }
            Node::Filter { filter, mode } => {
                if filter.matches(&row, &self.ctx.schemas[lane]) {
                    return self.forward(index, row);
                }
                if *mode == FilterMode::Interrupt && !self.ctx.stopped {
                    debug!(tdp_id = row.tdp_id, "Interrupt filter rejected row, stopping");
                    self.ctx.stopped = true;
                }
                Ok(())
            }
            Node::Branch => {
                self.copy_lanes(index);
                self.forward(index, row)
            }
            Node::Limit { limit } => {
                if let NodeState::Limit { passed } = &mut self.slots[index].state {
                    if *passed >= *limit {
                        return Ok(());
                    }
                    *passed += 1;
                }
                self.forward(index, row)
            }
            Node::Statistics {
                filter,
                kinds,
                hold_rows,
            } => {
                self.ensure_analyzer(index, filter, kinds)?;
                self.record(index, &row)?;
                if *hold_rows {
                    if let NodeState::Analysis(state) = &mut self.slots[index].state {
                        state.held.push(row);
                    }
                    return Ok(());
                }
                self.forward(index, row)
            }
            Node::InvalidDetection { filter } => {
                self.ensure_analyzer(index, filter, &[AnalysisKind::Quality])?;
                self.mark_invalid(index, &mut row)?;
                self.forward(index, row)
            }
            Node::DomainEnforcement => {
                self.enforce_domains(index);
                self.forward(index, row)
            }
            Node::Write(handle) => {
                if !row.is_deleted() {
                    handle.write_row(&row, &self.ctx.schemas[lane])?;
                }
                self.forward(index, row)
            }
            Node::Collect(handle) => {
                if !row.is_deleted() {
                    handle.push(row.clone());
                }
                self.forward(index, row)
            }
        }
    }

    fn push_signal(&mut self, index: usize, signal: Signal) -> PipelineResult<()> {
        let pipeline = self.pipeline;
        let lane = self.slots[index].lane;
        let node = pipeline.node(NodeIndex::new(index));

        match node {
            Node::Compile { action_index } => {
                if signal == Signal::EndOfStream && !self.ctx.cancelled {
                    // An empty stream still yields the action's schema changes
                    self.ensure_compiled(index, *action_index)?;
                }
            }
            Node::Branch => self.copy_lanes(index),
            Node::DomainEnforcement => self.enforce_domains(index),
            Node::Statistics {
                kinds, hold_rows, ..
            } => match signal {
                Signal::Cancel => self.discard(index),
                // Held rows go out ahead of the Stop they precede
                Signal::Stop if *hold_rows => {
                    self.commit_statistics(index, kinds)?;
                    self.release_held(index)?;
                }
                Signal::Stop => {}
                Signal::EndOfStream => {
                    self.commit_statistics(index, kinds)?;
                    self.release_held(index)?;
                }
            },
            Node::InvalidDetection { .. } => match signal {
                Signal::Cancel => self.discard(index),
                Signal::Stop => {}
                Signal::EndOfStream => self.commit_validity(index),
            },
            Node::StepMetadata { .. } | Node::Write(_) | Node::Collect(_) => {
                if let NodeState::Sink { received } = &mut self.slots[index].state {
                    received.push(signal);
                }
                if signal == Signal::EndOfStream {
                    let schema = &self.ctx.schemas[lane];
                    if self.ctx.options.partitioned {
                        self.ctx.sink_schemas.insert(index, schema.clone());
                    } else if let NodeState::Sink { received } = &self.slots[index].state {
                        finalize_sink(node, received, schema)?;
                    }
                }
            }
            Node::Source | Node::Action { .. } | Node::Filter { .. } | Node::Limit { .. } => {}
        }

        for child in self.slots[index].children.clone() {
            self.push_signal(child, signal)?;
        }
        Ok(())
    }

    fn ensure_compiled(&mut self, index: usize, action_index: usize) -> PipelineResult<()> {
        if let NodeState::Compile { compiled: true } = self.slots[index].state {
            return Ok(());
        }
        let resolved = &self.pipeline.actions()[action_index];
        let lane = self.slots[index].lane;
        let to_error = |e| PipelineError::action(resolved.name(), e);

        let (action, created) = resolved
            .compile(&mut self.ctx.schemas[lane])
            .map_err(to_error)?;
        let entry = CompiledEntry {
            action,
            scope: resolved.action.scope().map_err(to_error)?,
            filter: resolved.action.filter().map_err(to_error)?,
            row_id: resolved.action.row_id(),
        };
        debug!(
            action = resolved.name(),
            action_index,
            created = ?created,
            "Compiled action"
        );
        self.ctx.compiled.insert(action_index, entry);
        self.slots[index].state = NodeState::Compile { compiled: true };
        Ok(())
    }

    fn copy_lanes(&mut self, index: usize) {
        let NodeState::Branch { copied } = &mut self.slots[index].state else {
            return;
        };
        if *copied {
            return;
        }
        *copied = true;
        let lane = self.slots[index].lane;
        for child in self.slots[index].children.iter().skip(1) {
            let child_lane = self.slots[*child].lane;
            self.ctx.schemas[child_lane] = self.ctx.schemas[lane].clone();
        }
    }

    fn enforce_domains(&mut self, index: usize) {
        let NodeState::Domain { enforced } = &mut self.slots[index].state else {
            return;
        };
        if *enforced {
            return;
        }
        *enforced = true;
        let lane = self.slots[index].lane;
        enforce_domains(&mut self.ctx.schemas[lane]);
    }

    fn ensure_analyzer(
        &mut self,
        index: usize,
        filter: &ColumnFilter,
        kinds: &[AnalysisKind],
    ) -> PipelineResult<()> {
        let lane = self.slots[index].lane;
        let name = self.pipeline.node(NodeIndex::new(index)).name();
        let NodeState::Analysis(state) = &mut self.slots[index].state else {
            return Ok(());
        };
        if state.analyzer.is_some() || state.discarded {
            return Ok(());
        }
        let columns: Vec<Column> = filter
            .select(&self.ctx.schemas[lane])
            .into_iter()
            .cloned()
            .collect();
        let analyzer = self
            .ctx
            .analyzers
            .build(&columns, kinds)
            .map_err(|e| PipelineError::analyzer(name, e))?;
        state.columns = columns.into_iter().map(|c| c.id).collect();
        state.analyzer = Some(analyzer);
        Ok(())
    }

    fn record(&mut self, index: usize, row: &Row) -> PipelineResult<()> {
        let batch_size = self.ctx.options.batch_size.max(1);
        let NodeState::Analysis(state) = &mut self.slots[index].state else {
            return Ok(());
        };
        let values = state
            .columns
            .iter()
            .map(|id| row.get(id).map(str::to_string))
            .collect();
        state.buffer.push(values);
        if state.buffer.len() >= batch_size {
            flush(state)?;
        }
        Ok(())
    }

    fn mark_invalid(&mut self, index: usize, row: &mut Row) -> PipelineResult<()> {
        let NodeState::Analysis(state) = &mut self.slots[index].state else {
            return Ok(());
        };
        let Some(analyzer) = state.analyzer.as_mut() else {
            return Ok(());
        };
        let values: Vec<Option<&str>> = state.columns.iter().map(|id| row.get(id)).collect();
        analyzer
            .analyze(&values)
            .map_err(|e| PipelineError::analyzer("invalid_detection", e))?;

        let results = analyzer.results();
        let flags: Vec<(String, bool)> = state
            .columns
            .iter()
            .zip(results)
            .map(|(id, result)| {
                let invalid = row
                    .get(id)
                    .is_some_and(|v| result.invalid_values.contains(v));
                (id.clone(), invalid)
            })
            .collect();
        for (id, invalid) in flags {
            row.set_invalid(id, invalid);
        }
        Ok(())
    }

    fn discard(&mut self, index: usize) {
        if let NodeState::Analysis(state) = &mut self.slots[index].state {
            state.discard();
        }
    }

    fn commit_statistics(&mut self, index: usize, kinds: &[AnalysisKind]) -> PipelineResult<()> {
        let lane = self.slots[index].lane;
        let NodeState::Analysis(state) = &mut self.slots[index].state else {
            return Ok(());
        };
        if state.discarded || state.committed {
            return Ok(());
        }
        flush(state)?;
        state.committed = true;
        // No row reached the node: statistics are left untouched
        let Some(analyzer) = state.analyzer.as_ref() else {
            return Ok(());
        };
        let stashed = StashedAnalysis {
            kinds: kinds.to_vec(),
            invalid_only: false,
            results: analyzer.results().to_vec(),
        };
        stashed.apply(&mut self.ctx.schemas[lane]);
        debug!(
            node = index,
            columns = stashed.results.len(),
            "Committed statistics"
        );
        self.ctx.stashed.insert(index, stashed);
        Ok(())
    }

    fn commit_validity(&mut self, index: usize) {
        let lane = self.slots[index].lane;
        let NodeState::Analysis(state) = &mut self.slots[index].state else {
            return;
        };
        if state.discarded {
            return;
        }
        let Some(analyzer) = state.analyzer.as_ref() else {
            return;
        };
        let stashed = StashedAnalysis {
            kinds: vec![AnalysisKind::Quality],
            invalid_only: true,
            results: analyzer.results().to_vec(),
        };
        stashed.apply(&mut self.ctx.schemas[lane]);
        self.ctx.stashed.insert(index, stashed);
    }

    fn release_held(&mut self, index: usize) -> PipelineResult<()> {
        let held = match &mut self.slots[index].state {
            NodeState::Analysis(state) => std::mem::take(&mut state.held),
            _ => return Ok(()),
        };
        for row in held {
            if self.ctx.cancelled {
                break;
            }
            self.forward(index, row)?;
        }
        Ok(())
    }
}

fn initial_state(node: &Node) -> NodeState {
    match node {
        Node::Compile { .. } => NodeState::Compile { compiled: false },
        Node::Limit { .. } => NodeState::Limit { passed: 0 },
        Node::Branch => NodeState::Branch { copied: false },
        Node::Statistics { .. } | Node::InvalidDetection { .. } => {
            NodeState::Analysis(AnalysisState::default())
        }
        Node::DomainEnforcement => NodeState::Domain { enforced: false },
        Node::StepMetadata { .. } | Node::Write(_) | Node::Collect(_) => {
            NodeState::Sink { received: Vec::new() }
        }
        Node::Source | Node::Action { .. } | Node::Filter { .. } => NodeState::Stateless,
    }
}

fn flush(state: &mut AnalysisState) -> PipelineResult<()> {
    if state.buffer.is_empty() {
        return Ok(());
    }
    if let Some(analyzer) = state.analyzer.as_mut() {
        analyzer
            .analyze_batch(&state.buffer)
            .map_err(|e| PipelineError::analyzer("statistics", e))?;
    }
    state.buffer.clear();
    Ok(())
}

/// Signals closing a run, in delivery order
pub(crate) fn closing_signals(cancelled: bool, stopped: bool) -> Vec<Signal> {
    if cancelled {
        vec![Signal::Cancel, Signal::EndOfStream]
    } else if stopped {
        vec![Signal::Stop, Signal::EndOfStream]
    } else {
        vec![Signal::EndOfStream]
    }
}

/// Align column types with forced domains, drop domains the type no longer fits
pub(crate) fn enforce_domains(schema: &mut RowSchema) {
    for column in schema.columns_mut() {
        let Some(base_type) = column.domain.as_ref().and_then(|d| d.base_type) else {
            continue;
        };
        if base_type == column.column_type {
            continue;
        }
        if column.domain_forced {
            if !column.type_forced {
                column.column_type = base_type;
            }
        } else {
            column.domain = None;
        }
    }
}

/// Close a sink once every signal of the run has reached it
pub(crate) fn finalize_sink(node: &Node, signals: &[Signal], schema: &RowSchema) -> PipelineResult<()> {
    let cancelled = signals.contains(&Signal::Cancel);
    let ended = signals.contains(&Signal::EndOfStream);
    match node {
        Node::Write(handle) => {
            if ended {
                handle.finish(schema)?;
            }
        }
        Node::Collect(handle) => {
            for signal in signals {
                handle.record_signal(*signal);
            }
            if ended {
                handle.finish(schema);
            }
        }
        Node::StepMetadata {
            dataset_id,
            step_id,
            updater,
        } => {
            if ended && !cancelled {
                updater.update(dataset_id, step_id, schema.clone());
            }
        }
        _ => {}
    }
    Ok(())
}
