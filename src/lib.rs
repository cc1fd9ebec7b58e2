//! Data preparation core - versioned action pipelines over tabular data
//!
//! Provides:
//! - Row/column model, actions, filters, steps and preparations
//! - A built-in action catalog
//! - Action behavior profiling and statistics scheduling
//! - Pipeline graphs with streaming and partitioned executors
//! - Hash-chained step history with diff and reorder checks
//! - A content cache with TTL, prefix eviction and compression
//! - A transformation service tying these together

pub mod actions;
pub mod analysis;
pub mod cache;
pub mod config;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod profiler;
pub mod transformation;

// Re-export commonly used types
pub use actions::ActionRegistry;
pub use analysis::{AnalysisKind, Analyzer, AnalyzerError, AnalyzerService, BasicAnalyzerService};
pub use cache::{
    CacheError, CacheKey, CacheKind, ContentCache, FileContentCache, InMemoryContentCache,
    TimeToLive, ZipContentCache,
};
pub use config::{CacheConfig, ConfigError, EngineConfig, ExecutorKind};
pub use history::{
    DatasetProvider, HistoryEngine, HistoryError, HistoryResult, InMemoryDatasetProvider,
    InMemoryRepository, Repository, StepDiff, StepMetadataUpdater,
};
pub use models::{
    Action, ActionError, Behavior, Column, ColumnType, FilterExpr, Preparation, ROOT_STEP_ID, Row,
    RowSchema, RowStream, ScopeKind, Step,
};
pub use pipeline::{
    DistributedExecutor, ExecutionReport, Executor, Pipeline, PipelineBuilder, PipelineError,
    Signal, StreamingExecutor,
};
pub use profiler::{ActionProfiler, AnalysisPlan, ColumnFilter};
pub use transformation::{
    TransformationError, TransformationOutput, TransformationRequest, TransformationService,
};
