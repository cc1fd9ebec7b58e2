//! Pipeline graph and executor tests

use std::sync::Arc;

use dataprep_core::actions::ActionRegistry;
use dataprep_core::analysis::BasicAnalyzerService;
use dataprep_core::models::{Action, FilterExpr, Row, RowSchema, RowStream};
use dataprep_core::pipeline::{
    CollectHandle, DistributedExecutor, Executor, FilterMode, JsonRowWriter, Node, Pipeline,
    PipelineBuilder, PipelineError, SharedBuffer, Signal, StreamingExecutor, WriteHandle,
};
use dataprep_core::profiler::ActionProfiler;

fn streaming() -> StreamingExecutor {
    StreamingExecutor::new(Arc::new(BasicAnalyzerService::new()))
}

fn rows(values: &[&str]) -> RowStream {
    let schema = RowSchema::from_names(["name"]);
    let rows: Vec<Row> = values
        .iter()
        .enumerate()
        .map(|(i, v)| Row::from_values(i as u64, [("0000", *v)]))
        .collect();
    RowStream::new(schema, rows)
}

fn ids(collect: &CollectHandle) -> Vec<u64> {
    collect.rows().iter().map(|r| r.tdp_id).collect()
}

mod node_tests {
    use super::*;

    #[test]
    fn test_limit_passes_first_rows_without_signal() {
        let mut pipeline = Pipeline::new(Vec::new());
        let limit = pipeline.append(pipeline.root(), Node::Limit { limit: 2 });
        let collect = CollectHandle::new();
        pipeline.append(limit, Node::Collect(collect.clone()));

        let report = streaming()
            .execute(&pipeline, rows(&["a", "b", "c", "d", "e"]))
            .unwrap();

        assert_eq!(ids(&collect), vec![0, 1]);
        assert_eq!(collect.signals(), vec![Signal::EndOfStream]);
        assert!(!report.stopped);
        assert_eq!(report.rows_read, 5);
    }

    #[test]
    fn test_interrupt_filter_stops_after_second_row() {
        let mut pipeline = Pipeline::new(Vec::new());
        let filter = FilterExpr::parse(r#"{"not": {"eq": {"field": "0000", "value": "bad"}}}"#).unwrap();
        let node = pipeline.append(
            pipeline.root(),
            Node::Filter {
                filter,
                mode: FilterMode::Interrupt,
            },
        );
        let collect = CollectHandle::new();
        pipeline.append(node, Node::Collect(collect.clone()));

        let report = streaming()
            .execute(&pipeline, rows(&["a", "b", "bad", "c", "d"]))
            .unwrap();

        assert_eq!(ids(&collect), vec![0, 1]);
        assert!(report.stopped);
        assert_eq!(collect.signals(), vec![Signal::Stop, Signal::EndOfStream]);
    }

    #[test]
    fn test_drop_filter_keeps_going() {
        let mut pipeline = Pipeline::new(Vec::new());
        let filter = FilterExpr::parse(r#"{"not": {"eq": {"field": "0000", "value": "bad"}}}"#).unwrap();
        let node = pipeline.append(
            pipeline.root(),
            Node::Filter {
                filter,
                mode: FilterMode::Drop,
            },
        );
        let collect = CollectHandle::new();
        pipeline.append(node, Node::Collect(collect.clone()));

        streaming()
            .execute(&pipeline, rows(&["a", "bad", "c"]))
            .unwrap();
        assert_eq!(ids(&collect), vec![0, 2]);
        assert_eq!(collect.signals(), vec![Signal::EndOfStream]);
    }

    #[test]
    fn test_branch_lanes_do_not_share_rows() {
        let registry = ActionRegistry::with_builtins();
        let actions = registry
            .resolve_all(&[Action::on_column("uppercase", "0000")])
            .unwrap();
        let mut pipeline = Pipeline::new(actions);
        let branch = pipeline.append(pipeline.root(), Node::Branch);

        let compile = pipeline.append(branch, Node::Compile { action_index: 0 });
        let action = pipeline.append(compile, Node::Action { action_index: 0 });
        let upper = CollectHandle::new();
        pipeline.append(action, Node::Collect(upper.clone()));

        let plain = CollectHandle::new();
        pipeline.append(branch, Node::Collect(plain.clone()));

        streaming().execute(&pipeline, rows(&["ada"])).unwrap();
        assert_eq!(upper.rows()[0].get("0000"), Some("ADA"));
        assert_eq!(plain.rows()[0].get("0000"), Some("ada"));
    }
}

mod builder_tests {
    use super::*;

    #[test]
    fn test_statistics_before_action_see_every_row() {
        let registry = ActionRegistry::with_builtins();
        let actions = registry
            .resolve_all(&[Action::on_column("fill_with_mode", "0000")])
            .unwrap();
        let input = rows(&["a", "", "a", "b"]);
        let plan = ActionProfiler::new().profile(&actions, &input.schema);
        let collect = CollectHandle::new();
        let pipeline = PipelineBuilder::new(actions, plan)
            .with_collect(collect.clone())
            .build()
            .unwrap();

        streaming().execute(&pipeline, input).unwrap();

        let values: Vec<String> = collect
            .rows()
            .iter()
            .map(|r| r.get("0000").unwrap_or_default().to_string())
            .collect();
        assert_eq!(values, vec!["a", "a", "a", "b"]);
    }

    #[test]
    fn test_writer_output_and_final_statistics() {
        let registry = ActionRegistry::with_builtins();
        let actions = registry
            .resolve_all(&[Action::on_column("uppercase", "0000")])
            .unwrap();
        let input = rows(&["ada", "alan", "grace"]);
        let plan = ActionProfiler::new().profile(&actions, &input.schema);
        let buffer = SharedBuffer::new();
        let pipeline = PipelineBuilder::new(actions, plan)
            .with_writer(WriteHandle::new(JsonRowWriter::new(buffer.clone())))
            .build()
            .unwrap();

        let report = streaming().execute(&pipeline, input).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buffer.contents()).unwrap();
        assert_eq!(json["records"].as_array().unwrap().len(), 3);
        assert_eq!(json["records"][2]["0000"], "GRACE");
        let column = &report.schema.columns()[0];
        assert_eq!(column.statistics.count, 3);
    }
}

mod distributed_tests {
    use super::*;

    #[test]
    fn test_interrupt_filter_rejected() {
        let mut pipeline = Pipeline::new(Vec::new());
        let filter = FilterExpr::parse(r#"{"empty": {"field": "0000"}}"#).unwrap();
        pipeline.append(
            pipeline.root(),
            Node::Filter {
                filter,
                mode: FilterMode::Interrupt,
            },
        );
        let executor = DistributedExecutor::new(Arc::new(BasicAnalyzerService::new()), 3);
        let err = executor.execute(&pipeline, rows(&["a"])).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_every_row_reaches_the_sink() {
        let mut pipeline = Pipeline::new(Vec::new());
        let collect = CollectHandle::new();
        pipeline.append(pipeline.root(), Node::Collect(collect.clone()));

        let values: Vec<String> = (0..10).map(|i| format!("v{}", i)).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let executor = DistributedExecutor::new(Arc::new(BasicAnalyzerService::new()), 3);
        let report = executor.execute(&pipeline, rows(&refs)).unwrap();

        let mut seen = ids(&collect);
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u64>>());
        assert_eq!(report.rows_read, 10);
        assert_eq!(collect.signals(), vec![Signal::EndOfStream]);
    }

    const MIXED: [&str; 10] = ["1", "2", "3", "4", "a", "b", "c", "d", "5", "6"];

    fn built(action: Action, input: &RowStream) -> (Pipeline, CollectHandle) {
        let registry = ActionRegistry::with_builtins();
        let actions = registry.resolve_all(&[action]).unwrap();
        let plan = ActionProfiler::new().profile(&actions, &input.schema);
        let collect = CollectHandle::new();
        let pipeline = PipelineBuilder::new(actions, plan)
            .with_collect(collect.clone())
            .build()
            .unwrap();
        (pipeline, collect)
    }

    #[test]
    fn test_statistics_before_action_need_one_ordered_run() {
        let input = rows(&MIXED);
        let (pipeline, collect) = built(Action::on_column("delete_invalid", "0000"), &input);
        assert!(!pipeline.is_partitionable());

        let report = streaming().execute(&pipeline, input).unwrap();
        assert_eq!(ids(&collect), vec![0, 1, 2, 3, 8, 9]);
        assert_eq!(report.schema.columns()[0].statistics.count, 6);

        for partitions in [1, 2] {
            let (pipeline, collect) = built(Action::on_column("delete_invalid", "0000"), &rows(&MIXED));
            let executor = DistributedExecutor::new(Arc::new(BasicAnalyzerService::new()), partitions);
            let err = executor.execute(&pipeline, rows(&MIXED)).unwrap_err();
            assert!(matches!(err, PipelineError::UnsupportedOperation(_)));
            assert!(collect.is_empty());
        }
    }

    #[test]
    fn test_partitioned_runs_match_streaming_run() {
        let input = rows(&MIXED);
        let (pipeline, collect) = built(Action::on_column("uppercase", "0000"), &input);
        assert!(pipeline.is_partitionable());
        let expected = streaming().execute(&pipeline, input).unwrap().schema;
        let expected_rows: Vec<String> = collect
            .rows()
            .iter()
            .map(|r| r.get("0000").unwrap_or_default().to_string())
            .collect();

        for partitions in [1, 2] {
            let (pipeline, collect) = built(Action::on_column("uppercase", "0000"), &rows(&MIXED));
            let executor = DistributedExecutor::new(Arc::new(BasicAnalyzerService::new()), partitions);
            let report = executor.execute(&pipeline, rows(&MIXED)).unwrap();

            let mut seen = collect.rows();
            seen.sort_by_key(|r| r.tdp_id);
            let values: Vec<String> = seen
                .iter()
                .map(|r| r.get("0000").unwrap_or_default().to_string())
                .collect();
            assert_eq!(values, expected_rows);

            let actual = &report.schema.columns()[0];
            let wanted = &expected.columns()[0];
            assert_eq!(actual.column_type, wanted.column_type);
            assert_eq!(actual.statistics.count, wanted.statistics.count);
            assert_eq!(actual.statistics.valid, wanted.statistics.valid);
            assert_eq!(actual.statistics.invalid, wanted.statistics.invalid);
            assert_eq!(actual.statistics.distinct_count, wanted.statistics.distinct_count);
        }
    }
}
