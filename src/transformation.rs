//! Transformation service
//!
//! One request end to end: resolve the preparation's step, look the output up in the
//! content cache, and on a miss profile the step's actions, build the pipeline, run it
//! and publish the output and the step metadata to the cache. Entries are written only
//! for complete runs and only through put-then-commit, so a failed or cancelled run
//! never leaves a readable entry behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::analysis::AnalyzerService;
use crate::cache::{
    CacheKey, CacheKind, ContentCache, TimeToLive, ZipContentCache, read_or_miss, write_or_skip,
};
use crate::config::{EngineConfig, ExecutorKind};
use crate::history::{HistoryEngine, HistoryError, StepDiff};
use crate::models::{FilterExpr, Preparation, ResolvedAction, Row, RowSchema, RowStream, Step};
use crate::pipeline::{
    CancelFlag, CollectHandle, DistributedExecutor, ExecutionReport, Executor, FilterMode, JsonRowWriter,
    Pipeline, PipelineBuilder, PipelineError, SharedBuffer, StreamingExecutor, WriteHandle,
};
use crate::profiler::ActionProfiler;

/// Output format produced by the built-in writer
pub const JSON_FORMAT: &str = "json";

/// Errors that can occur while serving a transformation
#[derive(Error, Debug)]
pub enum TransformationError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for transformation operations
pub type TransformationResult<T> = Result<T, TransformationError>;

impl TransformationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransformationError::History(e) if e.is_not_found())
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            TransformationError::History(e) => e.is_retryable(),
            TransformationError::Pipeline(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            TransformationError::History(e) => e.user_message(),
            TransformationError::Pipeline(e) => e.user_message(),
            _ => self.to_string(),
        }
    }
}

/// What to compute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRequest {
    pub preparation_id: String,
    /// Step id, or `None` for the head
    pub step_id: Option<String>,
    pub filter: Option<FilterExpr>,
    /// Keep only the first rows of the output
    pub sample_size: Option<u64>,
    pub format: String,
}

impl TransformationRequest {
    pub fn new(preparation_id: impl Into<String>) -> Self {
        Self {
            preparation_id: preparation_id.into(),
            step_id: None,
            filter: None,
            sample_size: None,
            format: JSON_FORMAT.to_string(),
        }
    }

    pub fn at_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sample(mut self, sample_size: u64) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Whether the output covers the whole step (no filter, no sample)
    fn is_full(&self) -> bool {
        self.filter.is_none() && self.sample_size.is_none()
    }
}

/// Serialized output of a transformation
#[derive(Debug, Clone)]
pub struct TransformationOutput {
    pub step_id: String,
    pub content: Vec<u8>,
    pub from_cache: bool,
    /// Run summary; `None` on a cache hit
    pub report: Option<ExecutionReport>,
}

/// Rows of a step next to the columns it adds and removes
#[derive(Debug, Clone)]
pub struct Preview {
    pub step_id: String,
    pub rows: Vec<Row>,
    pub schema: RowSchema,
    /// Columns changed by the step's own action
    pub diff: StepDiff,
}

/// Facade over history, pipeline and cache
pub struct TransformationService {
    history: Arc<HistoryEngine>,
    analyzers: Arc<dyn AnalyzerService>,
    cache: Option<Arc<dyn ContentCache>>,
    config: EngineConfig,
    profiler: ActionProfiler,
}

impl TransformationService {
    pub fn new(history: Arc<HistoryEngine>, analyzers: Arc<dyn AnalyzerService>, config: EngineConfig) -> Self {
        Self {
            history,
            analyzers,
            cache: None,
            config,
            profiler: ActionProfiler::new(),
        }
    }

    /// Cache outputs in `cache`, zip-compressed when the configuration asks for it
    pub fn with_cache(mut self, cache: Arc<dyn ContentCache>) -> Self {
        let cache: Arc<dyn ContentCache> = if self.config.cache.compress {
            Arc::new(ZipContentCache::new(cache))
        } else {
            cache
        };
        self.cache = Some(cache);
        self
    }

    pub fn history(&self) -> &HistoryEngine {
        &self.history
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn content_key(&self, preparation: &Preparation, step: &Step, request: &TransformationRequest) -> CacheKey {
        CacheKey::new(preparation.dataset_id.clone(), CacheKind::Content)
            .with_preparation(preparation.id.clone())
            .with_step(step.id.clone())
            .with_filter(request.filter.as_ref())
            .with_sample(request.sample_size)
            .with_format(request.format.clone())
    }

    fn metadata_key(preparation: &Preparation, step: &Step) -> CacheKey {
        CacheKey::new(preparation.dataset_id.clone(), CacheKind::Metadata)
            .with_preparation(preparation.id.clone())
            .with_step(step.id.clone())
    }

    fn resolve_actions(&self, step: &Step) -> TransformationResult<Vec<ResolvedAction>> {
        self.history
            .registry()
            .resolve_all(&step.actions)
            .map_err(|e| TransformationError::History(crate::history::coherence::resolve_error(e)))
    }

    fn executor_for(&self, pipeline: &Pipeline, input: &RowStream, exact_order: bool) -> Box<dyn Executor> {
        let mut kind = if exact_order {
            ExecutorKind::Streaming
        } else {
            self.config.executor_for(input.size_hint())
        };
        if kind == ExecutorKind::Distributed && !pipeline.is_partitionable() {
            debug!("Pipeline needs statistics over the whole input, running it streaming");
            kind = ExecutorKind::Streaming;
        }
        match kind {
            ExecutorKind::Distributed => Box::new(
                DistributedExecutor::new(Arc::clone(&self.analyzers), self.config.partitions)
                    .with_batch_size(self.config.statistics_batch_size),
            ),
            _ => Box::new(
                StreamingExecutor::new(Arc::clone(&self.analyzers))
                    .with_batch_size(self.config.statistics_batch_size),
            ),
        }
    }

    /// Serve a transformation, from the cache when possible
    pub fn execute(&self, request: &TransformationRequest) -> TransformationResult<TransformationOutput> {
        self.execute_with_cancel(request, &CancelFlag::new())
    }

    /// [`execute`](Self::execute), giving up with [`PipelineError::Cancelled`] once `cancel` is set
    pub fn execute_with_cancel(
        &self,
        request: &TransformationRequest,
        cancel: &CancelFlag,
    ) -> TransformationResult<TransformationOutput> {
        if request.format != JSON_FORMAT {
            return Err(TransformationError::UnsupportedFormat(request.format.clone()));
        }
        let _span = info_span!(
            "transformation",
            preparation_id = %request.preparation_id,
            step = request.step_id.as_deref().unwrap_or("head")
        )
        .entered();

        let preparation = self.history.get_preparation(&request.preparation_id)?;
        let step = self
            .history
            .resolve_step(&preparation.id, request.step_id.as_deref().unwrap_or("head"))?;
        let key = self.content_key(&preparation, &step, request);

        if let Some(cache) = &self.cache {
            if let Some(content) = read_or_miss(cache.as_ref(), &key) {
                info!(step_id = %step.id, "Served from cache");
                return Ok(TransformationOutput {
                    step_id: step.id,
                    content,
                    from_cache: true,
                    report: None,
                });
            }
        }

        let input = self.history.datasets().content(&preparation.dataset_id)?;
        let actions = self.resolve_actions(&step)?;
        let plan = self.profiler.profile(&actions, &input.schema);
        debug!(
            full = plan.need_full_analysis,
            invalid_only = plan.need_invalid_only_analysis,
            "Analysis plan"
        );

        let buffer = SharedBuffer::new();
        let mut builder = PipelineBuilder::new(actions, plan)
            .with_writer(WriteHandle::new(JsonRowWriter::new(buffer.clone())));
        if let Some(filter) = &request.filter {
            builder = builder.with_filter(filter.clone(), FilterMode::Drop);
        }
        if let Some(sample) = request.sample_size {
            builder = builder.with_limit(sample);
        }
        if request.is_full() {
            if let Some(updater) = self.history.metadata_updater() {
                builder = builder.with_step_metadata(
                    preparation.dataset_id.clone(),
                    step.id.clone(),
                    Arc::clone(updater),
                );
            }
        }
        let pipeline = builder.build()?;

        let executor = self.executor_for(&pipeline, &input, request.sample_size.is_some());
        let report = executor.execute_with_cancel(&pipeline, input, cancel)?;
        if report.cancelled {
            info!(step_id = %step.id, rows = report.rows_read, "Transformation cancelled");
            return Err(PipelineError::Cancelled.into());
        }
        let content = buffer.contents();

        if let Some(cache) = &self.cache {
            if report.is_complete() {
                write_or_skip(cache.as_ref(), &key, TimeToLive::Default, &content);
                if request.is_full() {
                    let metadata = serde_json::to_vec(&report.schema)?;
                    write_or_skip(
                        cache.as_ref(),
                        &Self::metadata_key(&preparation, &step),
                        TimeToLive::Default,
                        &metadata,
                    );
                }
            }
        }

        Ok(TransformationOutput {
            step_id: step.id,
            content,
            from_cache: false,
            report: Some(report),
        })
    }

    /// Row schema (with statistics) of a step; runs the step on a cache miss
    pub fn metadata(&self, preparation_id: &str, step_ref: &str) -> TransformationResult<RowSchema> {
        let preparation = self.history.get_preparation(preparation_id)?;
        let step = self.history.resolve_step(preparation_id, step_ref)?;

        if let Some(cache) = &self.cache {
            if let Some(bytes) = read_or_miss(cache.as_ref(), &Self::metadata_key(&preparation, &step)) {
                return Ok(serde_json::from_slice(&bytes)?);
            }
        }

        let request = TransformationRequest::new(preparation_id).at_step(step.id.clone());
        let output = self.execute(&request)?;
        match output.report {
            Some(report) => Ok(report.schema),
            // Content was cached but metadata was not
            None => Ok(self.history.step_metadata(preparation_id, &step.id)?),
        }
    }

    /// First `limit` rows of a step, with the columns its own action creates and deletes
    pub fn preview(&self, preparation_id: &str, step_ref: &str, limit: u64) -> TransformationResult<Preview> {
        let preparation = self.history.get_preparation(preparation_id)?;
        let step = self.history.resolve_step(preparation_id, step_ref)?;
        let limit = limit.min(self.config.preview_limit);

        let diff = match &step.parent_id {
            Some(parent) => self.history.diff(preparation_id, parent, &step.id)?,
            None => StepDiff::default(),
        };

        let input = self.history.datasets().content(&preparation.dataset_id)?;
        let actions = self.resolve_actions(&step)?;
        let plan = self.profiler.profile(&actions, &input.schema);
        let collect = CollectHandle::new();
        let pipeline = PipelineBuilder::new(actions, plan)
            .with_limit(limit)
            .with_collect(collect.clone())
            .build()?;
        let report = self.executor_for(&pipeline, &input, true).execute(&pipeline, input)?;

        Ok(Preview {
            step_id: step.id,
            rows: collect.rows(),
            schema: collect.schema().unwrap_or(report.schema),
            diff,
        })
    }

    /// Run a single row through a step's actions
    ///
    /// Returns `None` when an action drops the row. An action emitting several rows
    /// is rejected with [`PipelineError::UnsupportedOperation`].
    pub fn preview_row(&self, preparation_id: &str, step_ref: &str, row: Row) -> TransformationResult<Option<Row>> {
        let preparation = self.history.get_preparation(preparation_id)?;
        let step = self.history.resolve_step(preparation_id, step_ref)?;
        let schema = self.history.datasets().metadata(&preparation.dataset_id)?;

        let actions = self.resolve_actions(&step)?;
        let plan = self.profiler.profile(&actions, &schema);
        let collect = CollectHandle::new();
        let pipeline = PipelineBuilder::new(actions, plan)
            .without_final_analysis()
            .with_collect(collect.clone())
            .build()?;
        StreamingExecutor::new(Arc::clone(&self.analyzers))
            .execute(&pipeline, RowStream::new(schema, vec![row]))?;

        let mut rows = collect.rows();
        if rows.len() > 1 {
            return Err(PipelineError::unsupported(format!(
                "step '{}' turns one row into {} rows",
                step.id,
                rows.len()
            ))
            .into());
        }
        Ok(rows.pop())
    }
}

impl std::fmt::Debug for TransformationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationService")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::analysis::BasicAnalyzerService;
    use crate::cache::InMemoryContentCache;
    use crate::history::{InMemoryDatasetProvider, InMemoryRepository};
    use crate::models::Action;

    fn service() -> (TransformationService, Preparation) {
        let datasets = InMemoryDatasetProvider::new();
        let rows = (0..4)
            .map(|i| Row::from_values(i, [("0000", format!("name{}", i)), ("0001", "x".to_string())]))
            .collect();
        datasets
            .insert("ds", RowSchema::from_names(["name", "flag"]), rows)
            .unwrap();
        let history = Arc::new(HistoryEngine::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(ActionRegistry::with_builtins()),
            Arc::new(datasets),
        ));
        let prep = history.create_preparation("ds", "p", "me").unwrap();
        let service = TransformationService::new(
            history,
            Arc::new(BasicAnalyzerService::new()),
            EngineConfig::default(),
        );
        (service, prep)
    }

    #[test]
    fn test_second_request_is_a_cache_hit() {
        let (service, prep) = service();
        let service = service.with_cache(Arc::new(InMemoryContentCache::default()));
        service
            .history()
            .append(&prep.id, Action::on_column("uppercase", "0000"))
            .unwrap();

        let request = TransformationRequest::new(prep.id.clone());
        let first = service.execute(&request).unwrap();
        assert!(!first.from_cache);
        let second = service.execute(&request).unwrap();
        assert!(second.from_cache);
        assert_eq!(first.content, second.content);

        let json: serde_json::Value = serde_json::from_slice(&second.content).unwrap();
        assert_eq!(json["records"][0]["0000"], "NAME0");
    }

    #[test]
    fn test_unsupported_format() {
        let (service, prep) = service();
        let err = service
            .execute(&TransformationRequest::new(prep.id).with_format("avro"))
            .unwrap_err();
        assert!(matches!(err, TransformationError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_preview_row_rejects_multiple_rows() {
        let (service, prep) = service();
        service
            .history()
            .append(&prep.id, Action::new("duplicate_row").with_param("scope", "row"))
            .unwrap();
        let err = service
            .preview_row(&prep.id, "head", Row::from_values(0, [("0000", "a")]))
            .unwrap_err();
        assert!(matches!(
            err,
            TransformationError::Pipeline(PipelineError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_preview_row_single_row() {
        let (service, prep) = service();
        service
            .history()
            .append(&prep.id, Action::on_column("uppercase", "0000"))
            .unwrap();
        let row = service
            .preview_row(&prep.id, "head", Row::from_values(0, [("0000", "ada")]))
            .unwrap()
            .unwrap();
        assert_eq!(row.get("0000"), Some("ADA"));
    }

    #[test]
    fn test_unknown_preparation_is_not_found() {
        let (service, _) = service();
        let err = service.execute(&TransformationRequest::new("nope")).unwrap_err();
        assert!(err.is_not_found());
    }
}
