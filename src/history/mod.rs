//! Step history
//!
//! A preparation's history is a hash-chained list of [`crate::models::Step`]s from the
//! root to the preparation's head. [`HistoryEngine`] is the whole mutation surface:
//! append, update, delete, reorder and head relocation, plus the diff used for
//! previews. Step metadata (the row schema computed for a step) is maintained off the
//! request path by [`StepMetadataUpdater`].

pub mod coherence;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod repository;

pub use coherence::{Replay, replay};
pub use dataset::{DatasetProvider, InMemoryDatasetProvider};
pub use engine::{HistoryEngine, StepDiff};
pub use error::{HistoryError, HistoryResult};
pub use metadata::{InMemoryStepMetadataRepository, StepMetadataRepository, StepMetadataUpdater};
pub use repository::{Entity, EntityKind, InMemoryRepository, Predicate, Repository};
