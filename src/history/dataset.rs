//! Dataset access
//!
//! Datasets live in an external service. The engine reads their current row schema
//! to replay step chains, and the transformation service reads their rows.

use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{HistoryError, HistoryResult};
use crate::models::{Row, RowSchema, RowStream};

/// Dataset service contract
pub trait DatasetProvider: Send + Sync {
    /// Current row schema of a dataset
    fn metadata(&self, dataset_id: &str) -> HistoryResult<RowSchema>;

    /// Single-pass stream over a dataset's rows
    fn content(&self, dataset_id: &str) -> HistoryResult<RowStream>;
}

#[derive(Debug, Clone)]
struct StoredDataset {
    schema: RowSchema,
    rows: Vec<Row>,
}

/// Process-local [`DatasetProvider`]
#[derive(Debug, Default)]
pub struct InMemoryDatasetProvider {
    datasets: RwLock<HashMap<String, StoredDataset>>,
}

impl InMemoryDatasetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a dataset
    pub fn insert(&self, dataset_id: impl Into<String>, schema: RowSchema, rows: Vec<Row>) -> HistoryResult<()> {
        let mut datasets = self.datasets.write().map_err(|_| poisoned())?;
        datasets.insert(dataset_id.into(), StoredDataset { schema, rows });
        Ok(())
    }

    fn stored(&self, dataset_id: &str) -> HistoryResult<StoredDataset> {
        let datasets = self.datasets.read().map_err(|_| poisoned())?;
        datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| HistoryError::DatasetNotFound(dataset_id.to_string()))
    }
}

fn poisoned() -> HistoryError {
    HistoryError::UpstreamUnavailable("dataset store lock poisoned".to_string())
}

impl DatasetProvider for InMemoryDatasetProvider {
    fn metadata(&self, dataset_id: &str) -> HistoryResult<RowSchema> {
        Ok(self.stored(dataset_id)?.schema)
    }

    fn content(&self, dataset_id: &str) -> HistoryResult<RowStream> {
        let stored = self.stored(dataset_id)?;
        Ok(RowStream::new(stored.schema, stored.rows))
    }
}
