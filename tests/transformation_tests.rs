//! End-to-end transformation tests

use std::sync::Arc;

use dataprep_core::actions::ActionRegistry;
use dataprep_core::analysis::BasicAnalyzerService;
use dataprep_core::cache::{CacheKey, CacheKind, ContentCache, FileContentCache};
use dataprep_core::config::{EngineConfig, ExecutorKind};
use dataprep_core::history::{
    HistoryEngine, InMemoryDatasetProvider, InMemoryRepository, InMemoryStepMetadataRepository,
    StepMetadataUpdater,
};
use dataprep_core::models::{Action, FilterExpr, Preparation, Row, RowSchema};
use dataprep_core::pipeline::{CancelFlag, PipelineError};
use dataprep_core::transformation::{TransformationError, TransformationRequest, TransformationService};
use tempfile::TempDir;

const CITIES: [&str; 6] = ["paris", "lyon", "", "nantes", "lille", "brest"];

fn history() -> (Arc<HistoryEngine>, Preparation) {
    let datasets = InMemoryDatasetProvider::new();
    let rows = CITIES
        .iter()
        .enumerate()
        .map(|(i, city)| Row::from_values(i as u64, [("0000", i.to_string()), ("0001", city.to_string())]))
        .collect();
    datasets
        .insert("cities", RowSchema::from_names(["id", "city"]), rows)
        .unwrap();
    let history = Arc::new(HistoryEngine::new(
        Arc::new(InMemoryRepository::new()),
        Arc::new(ActionRegistry::with_builtins()),
        Arc::new(datasets),
    ));
    let prep = history.create_preparation("cities", "clean cities", "bob").unwrap();
    (history, prep)
}

fn service(history: Arc<HistoryEngine>, config: EngineConfig) -> TransformationService {
    TransformationService::new(history, Arc::new(BasicAnalyzerService::new()), config)
}

fn records(content: &[u8]) -> Vec<serde_json::Value> {
    let json: serde_json::Value = serde_json::from_slice(content).unwrap();
    json["records"].as_array().cloned().unwrap_or_default()
}

mod execute_tests {
    use super::*;

    #[test]
    fn test_file_cache_serves_second_request() {
        let dir = TempDir::new().unwrap();
        let (history, prep) = history();
        history
            .append(&prep.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        let service = service(history, EngineConfig::default())
            .with_cache(Arc::new(FileContentCache::new(dir.path()).unwrap()));

        let request = TransformationRequest::new(prep.id.clone());
        let first = service.execute(&request).unwrap();
        assert!(!first.from_cache);
        assert_eq!(records(&first.content)[0]["0001"], "PARIS");

        let second = service.execute(&request).unwrap();
        assert!(second.from_cache);
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn test_filter_and_sample_are_cached_separately() {
        let (history, prep) = history();
        let cache = Arc::new(dataprep_core::cache::InMemoryContentCache::default());
        let service = service(history, EngineConfig::default()).with_cache(cache.clone());

        let filter = FilterExpr::parse(r#"{"not": {"empty": {"field": "0001"}}}"#).unwrap();
        let filtered = service
            .execute(&TransformationRequest::new(prep.id.clone()).with_filter(filter))
            .unwrap();
        assert_eq!(records(&filtered.content).len(), 5);

        let sampled = service
            .execute(&TransformationRequest::new(prep.id.clone()).with_sample(2))
            .unwrap();
        assert!(!sampled.from_cache);
        assert_eq!(records(&sampled.content).len(), 2);

        let full = service
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();
        assert!(!full.from_cache);
        assert_eq!(records(&full.content).len(), CITIES.len());
    }

    #[test]
    fn test_old_step_is_still_addressable() {
        let (history, prep) = history();
        let first = history
            .append(&prep.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        history
            .append(&prep.id, Action::on_column("delete_column", "0000"))
            .unwrap();
        let service = service(history, EngineConfig::default());

        let at_first = service
            .execute(&TransformationRequest::new(prep.id.clone()).at_step(first.id.clone()))
            .unwrap();
        assert_eq!(at_first.step_id, first.id);
        assert_eq!(records(&at_first.content)[0]["0000"], "0");

        let head = service
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();
        assert!(records(&head.content)[0].get("0000").is_none());
    }

    #[test]
    fn test_distributed_executor_writes_every_row() {
        let (history, prep) = history();
        history
            .append(&prep.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        let config = EngineConfig::default()
            .with_executor(ExecutorKind::Distributed)
            .with_partitions(3);
        let service = service(history, config);

        let output = service
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();
        let mut cities: Vec<String> = records(&output.content)
            .iter()
            .map(|r| r["0001"].as_str().unwrap_or_default().to_string())
            .collect();
        cities.sort();
        let mut expected: Vec<String> = CITIES.iter().map(|c| c.to_uppercase()).collect();
        expected.sort();
        assert_eq!(cities, expected);
    }

    #[test]
    fn test_cancelled_run_is_an_error_and_not_cached() {
        let (history, prep) = history();
        history
            .append(&prep.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        let cache = Arc::new(dataprep_core::cache::InMemoryContentCache::default());
        let service = service(history, EngineConfig::default()).with_cache(cache.clone());
        let request = TransformationRequest::new(prep.id.clone());

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = service.execute_with_cancel(&request, &cancel).unwrap_err();
        assert!(matches!(err, TransformationError::Pipeline(PipelineError::Cancelled)));
        assert!(!err.is_retryable());
        assert!(cache.is_empty());

        let output = service.execute(&request).unwrap();
        assert!(!output.from_cache);
        assert_eq!(records(&output.content).len(), CITIES.len());
    }

    #[test]
    fn test_distributed_config_runs_whole_input_analysis_in_order() {
        let (history, prep) = history();
        history
            .append(&prep.id, Action::on_column("delete_invalid", "0000"))
            .unwrap();
        let streamed = service(history.clone(), EngineConfig::default())
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();

        let config = EngineConfig::default()
            .with_executor(ExecutorKind::Distributed)
            .with_partitions(2);
        let distributed = service(history, config)
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();

        assert_eq!(records(&distributed.content).len(), CITIES.len());
        assert_eq!(records(&distributed.content), records(&streamed.content));
    }
}

mod metadata_tests {
    use super::*;

    #[test]
    fn test_metadata_is_cached_after_full_run() {
        let (history, prep) = history();
        let step = history
            .append(&prep.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        let cache = Arc::new(dataprep_core::cache::InMemoryContentCache::default());
        let service = service(history, EngineConfig::default()).with_cache(cache.clone());

        service
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();

        let key = CacheKey::new("cities", CacheKind::Metadata)
            .with_preparation(prep.id.clone())
            .with_step(step.id.clone());
        assert!(cache.has(&key).unwrap());

        let schema = service.metadata(&prep.id, "head").unwrap();
        let city = schema.column("0001").unwrap();
        assert_eq!(city.statistics.count, CITIES.len() as u64);
        assert_eq!(city.statistics.empty, 1);
    }

    #[test]
    fn test_step_metadata_is_recorded() {
        let (history, prep) = history();
        let store = Arc::new(InMemoryStepMetadataRepository::new());
        let updater = Arc::new(StepMetadataUpdater::new(store.clone(), 8).unwrap());
        let history = Arc::new(
            Arc::try_unwrap(history)
                .unwrap()
                .with_metadata_updater(updater.clone()),
        );
        let step = history
            .append(&prep.id, Action::on_column("compute_length", "0001"))
            .unwrap();
        let service = service(history, EngineConfig::default());

        service
            .execute(&TransformationRequest::new(prep.id.clone()))
            .unwrap();
        updater.flush();

        let recorded = updater.get("cities", &step.id).unwrap().unwrap();
        assert_eq!(recorded.len(), 3);
    }
}

mod preview_tests {
    use super::*;

    #[test]
    fn test_preview_reports_created_columns() {
        let (history, prep) = history();
        history
            .append(&prep.id, Action::on_column("copy", "0001"))
            .unwrap();
        let service = service(history, EngineConfig::default().with_preview_limit(3));

        let preview = service.preview(&prep.id, "head", 10).unwrap();
        assert_eq!(preview.rows.len(), 3);
        assert_eq!(preview.diff.created, vec!["0002".to_string()]);
        assert!(preview.diff.deleted.is_empty());
        assert_eq!(preview.rows[0].get("0002"), Some("paris"));
        assert!(preview.schema.contains("0002"));
    }

    #[test]
    fn test_preview_row_applies_step() {
        let (history, prep) = history();
        history
            .append(&prep.id, Action::on_column("uppercase", "0001"))
            .unwrap();
        let service = service(history, EngineConfig::default());

        let row = Row::from_values(42, [("0000", "42"), ("0001", "rennes")]);
        let out = service.preview_row(&prep.id, "head", row).unwrap().unwrap();
        assert_eq!(out.get("0001"), Some("RENNES"));
        assert_eq!(out.tdp_id, 42);
    }
}
