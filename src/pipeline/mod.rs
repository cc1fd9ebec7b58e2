//! Pipeline graph and executors
//!
//! A [`Pipeline`] is a tree of [`Node`]s built once per request by
//! [`PipelineBuilder`] from a step's action list and its
//! [`crate::profiler::AnalysisPlan`]. An [`Executor`] drives a
//! [`crate::models::RowStream`] through it and closes the run with lifecycle
//! [`Signal`]s.
//!
//! ## Signal protocol
//!
//! Signals follow the rows, root to leaves, once the source is exhausted or the run
//! is interrupted:
//!
//! - normal end: `END_OF_STREAM`
//! - interrupt filter: `STOP`, then `END_OF_STREAM`
//! - cancellation: `CANCEL`, then `END_OF_STREAM`
//!
//! Statistics commit and writers finalize on `END_OF_STREAM`. After `CANCEL`,
//! analysis nodes drop their state and step metadata is not recorded.

pub mod builder;
pub mod distributed;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub(crate) mod runtime;
pub mod signal;
pub mod writer;

pub use builder::PipelineBuilder;
pub use distributed::DistributedExecutor;
pub use error::{PipelineError, PipelineResult};
pub use executor::{DEFAULT_BATCH_SIZE, ExecutionReport, Executor, StreamingExecutor};
pub use graph::Pipeline;
pub use node::{FilterMode, Node};
pub use signal::{CancelFlag, Signal};
pub use writer::{CollectHandle, JsonRowWriter, RowWriter, SharedBuffer, WriteHandle};
