//! End-to-end aggregation scenarios: collect through the public API,
//! trigger cycle boundaries, and check what the sink receives.

use chrono::Utc;
use kooste::{
    Aggregate, AggregateData, MetricCollectionManager, MetricKind, MetricTag, SubmissionSink,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Sink that records every aggregate and returns it to its owner.
#[derive(Default)]
struct CapturingSink {
    received: Mutex<Vec<(String, AggregateData)>>,
}

impl CapturingSink {
    fn data_for(&self, canonical: &str) -> Vec<AggregateData> {
        self.received
            .lock()
            .iter()
            .filter(|(identity, _)| identity == canonical)
            .map(|(_, data)| *data)
            .collect()
    }
}

impl SubmissionSink for CapturingSink {
    fn submit_metrics(&self, aggregates: Vec<Aggregate>) {
        let mut received = self.received.lock();
        for aggregate in aggregates {
            received.push((aggregate.identity().canonical().to_owned(), *aggregate.data()));
            aggregate.reinitialize_and_return_to_owner();
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> (Arc<MetricCollectionManager>, Arc<CapturingSink>) {
    init_tracing();
    let manager = MetricCollectionManager::with_defaults();
    let sink = Arc::new(CapturingSink::default());
    manager.set_submission_sink(Some(Arc::clone(&sink) as Arc<dyn SubmissionSink>));
    (manager, sink)
}

#[test]
fn measurement_five_point_summary() {
    let (manager, sink) = harness();
    let latency = manager
        .get_or_create_metric(
            "api.latency",
            MetricKind::Measurement,
            MetricTag::parse_many("route:PutItem").unwrap(),
        )
        .unwrap();

    for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
        assert!(latency.collect(v));
    }
    manager.run_collection_cycle(Utc::now());

    let aggregates = sink.data_for("api.latency;route:PutItem");
    assert_eq!(aggregates.len(), 1);
    match aggregates[0] {
        AggregateData::Measurement {
            count,
            sum,
            min,
            max,
            std_dev,
        } => {
            assert_eq!(count, 5);
            assert_eq!(sum, 15.0);
            assert_eq!(min, 1.0);
            assert_eq!(max, 5.0);
            assert!((std_dev - 1.4142135624).abs() < 1e-9);
        }
        other => panic!("expected measurement aggregate, got {:?}", other),
    }
}

#[test]
fn count_accepts_integral_samples_only() {
    let (manager, sink) = harness();
    let errors = manager
        .get_or_create_metric(
            "errors",
            MetricKind::Count,
            MetricTag::parse_many("impact:medium,scope:app").unwrap(),
        )
        .unwrap();

    assert!(errors.collect(2));
    assert!(errors.collect(3.0));
    assert!(!errors.collect(4.5));
    assert!(errors.collect(1));

    manager.run_collection_cycle(Utc::now());

    let aggregates = sink.data_for("errors;impact:medium,scope:app");
    assert_eq!(aggregates, vec![AggregateData::Count { sum: 6 }]);
}

#[test]
fn measurement_excludes_nan_from_statistics() {
    let (manager, sink) = harness();
    let latency = manager
        .get_or_create_metric(
            "api.latency",
            MetricKind::Measurement,
            MetricTag::parse_many("route:PutItem").unwrap(),
        )
        .unwrap();

    for v in [1.0, 2.0, 3.0, 4.0, 5.0, f64::NAN, 0.0] {
        assert!(latency.collect(v));
    }
    manager.run_collection_cycle(Utc::now());

    match sink.data_for("api.latency;route:PutItem")[0] {
        AggregateData::Measurement {
            count,
            sum,
            min,
            max,
            ..
        } => {
            assert_eq!(count, 6);
            assert_eq!(sum, 15.0);
            assert_eq!(min, 0.0);
            assert_eq!(max, 5.0);
        }
        other => panic!("expected measurement aggregate, got {:?}", other),
    }
}

#[test]
fn periods_are_isolated() {
    let (manager, sink) = harness();
    let metric = manager
        .get_or_create_metric("batch.size", MetricKind::Measurement, vec![])
        .unwrap();

    assert!(metric.collect(10.0));
    assert!(metric.collect(20.0));
    manager.run_collection_cycle(Utc::now());

    assert!(metric.collect(30.0));
    manager.run_collection_cycle(Utc::now());

    let aggregates = sink.data_for("batch.size");
    assert_eq!(aggregates.len(), 2);
    match aggregates[0] {
        AggregateData::Measurement {
            count, sum, min, max, ..
        } => {
            assert_eq!((count, sum, min, max), (2, 30.0, 10.0, 20.0));
        }
        other => panic!("expected measurement aggregate, got {:?}", other),
    }
    match aggregates[1] {
        AggregateData::Measurement {
            count, sum, min, max, ..
        } => {
            assert_eq!((count, sum, min, max), (1, 30.0, 30.0, 30.0));
        }
        other => panic!("expected measurement aggregate, got {:?}", other),
    }
}

#[test]
fn registry_round_trip() {
    let (manager, _sink) = harness();
    let id = kooste::MetricIdentity::plain("roundtrip").unwrap();

    let first = manager
        .get_or_create_metric("roundtrip", MetricKind::Count, vec![])
        .unwrap();
    let second = manager
        .get_or_create_metric("roundtrip", MetricKind::Count, vec![])
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    assert!(manager.try_remove_metric(&id));
    assert!(!manager.try_remove_metric(&id));
}

#[test]
fn tag_parsing_matches_grammar() {
    let tags = MetricTag::parse_many("env:dev, ver:5 ,, ,mark,note:,foo:bar").unwrap();
    let parsed: Vec<(&str, Option<&str>)> = tags.iter().map(|t| (t.name(), t.value())).collect();
    assert_eq!(
        parsed,
        vec![
            ("env", Some("dev")),
            ("ver", Some("5")),
            ("mark", None),
            ("note", Some("")),
            ("foo", Some("bar")),
        ]
    );
}

#[test]
fn aggregate_window_carries_period_instants() {
    let manager = MetricCollectionManager::with_defaults();

    #[derive(Default)]
    struct WindowSink {
        windows: Mutex<Vec<(chrono::DateTime<Utc>, chrono::DateTime<Utc>, u32)>>,
    }
    impl SubmissionSink for WindowSink {
        fn submit_metrics(&self, aggregates: Vec<Aggregate>) {
            let mut windows = self.windows.lock();
            for aggregate in aggregates {
                windows.push((
                    aggregate.period_start(),
                    aggregate.period_end(),
                    aggregate.finished_duration_ms(),
                ));
                aggregate.reinitialize_and_return_to_owner();
            }
        }
    }

    let sink = Arc::new(WindowSink::default());
    manager.set_submission_sink(Some(Arc::clone(&sink) as Arc<dyn SubmissionSink>));
    let metric = manager
        .get_or_create_metric("windowed", MetricKind::Count, vec![])
        .unwrap();
    metric.collect(1);

    let boundary = Utc::now();
    manager.run_collection_cycle(boundary);

    let windows = sink.windows.lock();
    assert_eq!(windows.len(), 1);
    let (_start, end, _duration) = windows[0];
    assert_eq!(end, boundary);
}

#[test]
fn many_metrics_split_into_submission_blocks() {
    let config = kooste::AggregationConfig {
        submission_block_size: 8,
        ..Default::default()
    };
    let manager = MetricCollectionManager::new(config).unwrap();

    #[derive(Default)]
    struct BlockSink {
        block_sizes: Mutex<Vec<usize>>,
    }
    impl SubmissionSink for BlockSink {
        fn submit_metrics(&self, aggregates: Vec<Aggregate>) {
            self.block_sizes.lock().push(aggregates.len());
            for aggregate in aggregates {
                aggregate.reinitialize_and_return_to_owner();
            }
        }
    }

    let sink = Arc::new(BlockSink::default());
    manager.set_submission_sink(Some(Arc::clone(&sink) as Arc<dyn SubmissionSink>));

    for i in 0..20 {
        let metric = manager
            .get_or_create_metric(&format!("metric.{i}"), MetricKind::Count, vec![])
            .unwrap();
        metric.collect(1);
    }
    manager.run_collection_cycle(Utc::now());

    let sizes = sink.block_sizes.lock();
    assert_eq!(sizes.iter().sum::<usize>(), 20);
    assert_eq!(*sizes, vec![8, 8, 4]);
}
