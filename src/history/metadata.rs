//! Step metadata: the row schema computed for a step, updated off the request path
//!
//! Entries are keyed by dataset and step: a step id only hashes the action chain, so
//! preparations on different datasets can share one.
//!
//! Updates and invalidations go through two bounded queues, each drained by one
//! dedicated worker thread, so a slow or failing store never blocks the caller. A
//! full queue or a store failure is logged and the message dropped: the metadata can
//! always be recomputed from the dataset.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, warn};

use super::error::{HistoryError, HistoryResult};
use crate::models::RowSchema;

/// Storage for per-step row schemas of one dataset
pub trait StepMetadataRepository: Send + Sync {
    fn get(&self, dataset_id: &str, step_id: &str) -> HistoryResult<Option<RowSchema>>;

    fn update(&self, dataset_id: &str, step_id: &str, schema: RowSchema) -> HistoryResult<()>;

    fn invalidate(&self, dataset_id: &str, step_id: &str) -> HistoryResult<()>;
}

type MetadataKey = (String, String);

fn metadata_key(dataset_id: &str, step_id: &str) -> MetadataKey {
    (dataset_id.to_string(), step_id.to_string())
}

/// Process-local [`StepMetadataRepository`]
#[derive(Debug, Default)]
pub struct InMemoryStepMetadataRepository {
    entries: RwLock<HashMap<MetadataKey, RowSchema>>,
}

impl InMemoryStepMetadataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StepMetadataRepository for InMemoryStepMetadataRepository {
    fn get(&self, dataset_id: &str, step_id: &str) -> HistoryResult<Option<RowSchema>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| HistoryError::repository("step metadata lock poisoned"))?;
        Ok(entries.get(&metadata_key(dataset_id, step_id)).cloned())
    }

    fn update(&self, dataset_id: &str, step_id: &str, schema: RowSchema) -> HistoryResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| HistoryError::repository("step metadata lock poisoned"))?;
        entries.insert(metadata_key(dataset_id, step_id), schema);
        Ok(())
    }

    fn invalidate(&self, dataset_id: &str, step_id: &str) -> HistoryResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| HistoryError::repository("step metadata lock poisoned"))?;
        entries.remove(&metadata_key(dataset_id, step_id));
        Ok(())
    }
}

enum UpdateMessage {
    Update {
        dataset_id: String,
        step_id: String,
        schema: RowSchema,
    },
    Flush(Sender<()>),
}

enum InvalidateMessage {
    Invalidate { dataset_id: String, step_id: String },
    Flush(Sender<()>),
}

/// Asynchronous writer in front of a [`StepMetadataRepository`]
///
/// Messages of one queue are applied in enqueue order. Dropping the updater closes
/// both queues and waits for the workers to drain them.
pub struct StepMetadataUpdater {
    repository: Arc<dyn StepMetadataRepository>,
    updates: Option<Sender<UpdateMessage>>,
    invalidations: Option<Sender<InvalidateMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl StepMetadataUpdater {
    /// Start both workers; `capacity` bounds each queue
    pub fn new(repository: Arc<dyn StepMetadataRepository>, capacity: usize) -> HistoryResult<Self> {
        let capacity = capacity.max(1);
        let (update_tx, update_rx) = bounded(capacity);
        let (invalidate_tx, invalidate_rx) = bounded(capacity);

        let update_worker = {
            let repository = Arc::clone(&repository);
            std::thread::Builder::new()
                .name("step-metadata-update".to_string())
                .spawn(move || run_updates(repository, update_rx))
                .map_err(|e| HistoryError::repository(format!("cannot start worker: {e}")))?
        };
        let invalidate_worker = {
            let repository = Arc::clone(&repository);
            std::thread::Builder::new()
                .name("step-metadata-invalidate".to_string())
                .spawn(move || run_invalidations(repository, invalidate_rx))
                .map_err(|e| HistoryError::repository(format!("cannot start worker: {e}")))?
        };

        Ok(Self {
            repository,
            updates: Some(update_tx),
            invalidations: Some(invalidate_tx),
            workers: vec![update_worker, invalidate_worker],
        })
    }

    /// Enqueue a schema for `step_id` run on `dataset_id`; returns whether it was accepted
    pub fn update(&self, dataset_id: &str, step_id: &str, schema: RowSchema) -> bool {
        let Some(tx) = &self.updates else {
            return false;
        };
        let message = UpdateMessage::Update {
            dataset_id: dataset_id.to_string(),
            step_id: step_id.to_string(),
            schema,
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(dataset_id, step_id, "Step metadata update queue full, dropping update");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(dataset_id, step_id, "Step metadata update worker gone, dropping update");
                false
            }
        }
    }

    /// Enqueue removal of the metadata of `step_id` on `dataset_id`; returns whether it
    /// was accepted
    pub fn invalidate(&self, dataset_id: &str, step_id: &str) -> bool {
        let Some(tx) = &self.invalidations else {
            return false;
        };
        let message = InvalidateMessage::Invalidate {
            dataset_id: dataset_id.to_string(),
            step_id: step_id.to_string(),
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(dataset_id, step_id, "Step metadata invalidation queue full, dropping request");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(dataset_id, step_id, "Step metadata invalidation worker gone, dropping request");
                false
            }
        }
    }

    /// Block until every message enqueued before this call has been applied
    pub fn flush(&self) {
        if let Some(tx) = &self.updates {
            let (ack_tx, ack_rx) = bounded(1);
            if tx.send(UpdateMessage::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
        if let Some(tx) = &self.invalidations {
            let (ack_tx, ack_rx) = bounded(1);
            if tx.send(InvalidateMessage::Flush(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    /// Read through to the repository
    pub fn get(&self, dataset_id: &str, step_id: &str) -> HistoryResult<Option<RowSchema>> {
        self.repository.get(dataset_id, step_id)
    }
}

impl std::fmt::Debug for StepMetadataUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepMetadataUpdater")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl Drop for StepMetadataUpdater {
    fn drop(&mut self) {
        self.updates.take();
        self.invalidations.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Step metadata worker panicked");
            }
        }
    }
}

fn run_updates(repository: Arc<dyn StepMetadataRepository>, rx: Receiver<UpdateMessage>) {
    for message in rx {
        match message {
            UpdateMessage::Update {
                dataset_id,
                step_id,
                schema,
            } => match repository.update(&dataset_id, &step_id, schema) {
                Ok(()) => debug!(dataset_id = %dataset_id, step_id = %step_id, "Step metadata updated"),
                Err(e) => warn!(
                    dataset_id = %dataset_id,
                    step_id = %step_id,
                    error = %e,
                    "Step metadata update failed"
                ),
            },
            UpdateMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn run_invalidations(repository: Arc<dyn StepMetadataRepository>, rx: Receiver<InvalidateMessage>) {
    for message in rx {
        match message {
            InvalidateMessage::Invalidate {
                dataset_id,
                step_id,
            } => match repository.invalidate(&dataset_id, &step_id) {
                Ok(()) => debug!(dataset_id = %dataset_id, step_id = %step_id, "Step metadata invalidated"),
                Err(e) => warn!(
                    dataset_id = %dataset_id,
                    step_id = %step_id,
                    error = %e,
                    "Step metadata invalidation failed"
                ),
            },
            InvalidateMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
