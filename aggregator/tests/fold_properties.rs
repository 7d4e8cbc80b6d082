//! Fold behaviour through the host lifecycle hooks, against the in-memory store.

use loadfold_aggregator::config::{AggregatorConfig, FailurePolicy, FoldMode, MissingRowPolicy};
use loadfold_aggregator::storage::memory::InMemoryRowStore;
use loadfold_aggregator::{AggregationListener, AggregatorError, DropReason};
use loadfold_shared::types::aggregate::{AggregateKey, AggregateRow};
use loadfold_shared::types::events::{ChangeEvent, EventType, FieldValue};
use std::sync::Arc;

fn reading(weekday: i64, time_slice: i64, plug_id: i64, value: f64) -> ChangeEvent {
    ChangeEvent::insert([
        ("weekday", FieldValue::Int(weekday)),
        ("time_slice", FieldValue::Int(time_slice)),
        ("plug_id", FieldValue::Int(plug_id)),
        ("value", FieldValue::Float(value)),
    ])
}

fn config(workers: usize) -> AggregatorConfig {
    AggregatorConfig {
        workers,
        ..AggregatorConfig::default()
    }
}

async fn started(store: &InMemoryRowStore, config: AggregatorConfig) -> Arc<AggregationListener> {
    let listener = Arc::new(AggregationListener::new(Arc::new(store.clone()), config));
    listener.init("value").unwrap();
    listener.start().await.unwrap();
    listener
}

#[tokio::test]
async fn scenario_matching_row_is_updated() {
    let store = InMemoryRowStore::new();
    store.seed(AggregateKey::new(1, 3, 7), AggregateRow::new(10.0, 2));
    let listener = started(&store, config(2)).await;

    let handled = listener
        .process_events(vec![reading(1, 3, 7, 5.0)])
        .await
        .unwrap();
    listener.close().await;

    assert!(handled);
    assert_eq!(
        store.get(&AggregateKey::new(1, 3, 7)),
        Some(AggregateRow::new(15.0, 3))
    );
}

#[tokio::test]
async fn scenario_unknown_key_is_dropped() {
    let store = InMemoryRowStore::new();
    store.seed(AggregateKey::new(1, 3, 7), AggregateRow::new(10.0, 2));
    let listener = started(&store, config(2)).await;

    let report = listener
        .process_batch(vec![reading(2, 3, 7, 5.0)])
        .await
        .unwrap();
    // The host still sees the batch as handled
    let handled = listener
        .process_events(vec![reading(2, 3, 7, 5.0)])
        .await
        .unwrap();
    listener.close().await;

    assert!(handled);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].reason, DropReason::MissingRow);
    assert_eq!(report.dropped[0].key, Some(AggregateKey::new(2, 3, 7)));
    assert_eq!(store.len(), 1);
    assert_eq!(
        store.get(&AggregateKey::new(1, 3, 7)),
        Some(AggregateRow::new(10.0, 2))
    );
}

#[tokio::test]
async fn fold_is_independent_of_batching() {
    let values = [0.5, 1.25, 2.0, 4.0, 0.25, 8.0, 3.5];
    let expected = AggregateRow::new(100.0 + values.iter().sum::<f64>(), 3 + values.len() as i64);
    let key = AggregateKey::new(5, 40, 11);

    for split in [1, 2, 3, values.len()] {
        let store = InMemoryRowStore::new();
        store.seed(key, AggregateRow::new(100.0, 3));
        let listener = started(&store, config(3)).await;

        let events: Vec<_> = values.iter().map(|v| reading(5, 40, 11, *v)).collect();
        for chunk in events.chunks(split) {
            let report = listener.process_batch(chunk.to_vec()).await.unwrap();
            assert!(report.is_clean());
        }
        listener.close().await;

        assert_eq!(store.get(&key), Some(expected), "split into chunks of {}", split);
    }
}

#[tokio::test]
async fn keys_are_isolated() {
    let store = InMemoryRowStore::new();
    let a = AggregateKey::new(0, 1, 1);
    let b = AggregateKey::new(0, 1, 2);
    store.seed(a, AggregateRow::default());
    store.seed(b, AggregateRow::new(7.0, 1));
    let listener = started(&store, config(2)).await;

    let report = listener
        .process_batch(vec![reading(0, 1, 1, 2.0), reading(0, 1, 1, 3.0)])
        .await
        .unwrap();
    listener.close().await;

    assert_eq!(report.folded, 2);
    assert_eq!(store.get(&a), Some(AggregateRow::new(5.0, 2)));
    assert_eq!(store.get(&b), Some(AggregateRow::new(7.0, 1)));
}

#[tokio::test]
async fn non_insert_events_never_reach_the_store() {
    let store = InMemoryRowStore::new();
    store.seed(AggregateKey::new(1, 3, 7), AggregateRow::new(10.0, 2));
    let listener = started(&store, config(1)).await;

    let events = [
        EventType::AfterUpdate,
        EventType::AfterDelete,
        EventType::BulkDml,
        EventType::Other,
    ]
    .into_iter()
    .map(|event_type| ChangeEvent {
        event_type,
        ..reading(1, 3, 7, 5.0)
    })
    .collect();
    let report = listener.process_batch(events).await.unwrap();
    listener.close().await;

    assert_eq!(report.ignored, 4);
    assert_eq!(store.reads(), 0);
    assert_eq!(store.writes(), 0);
    assert_eq!(
        store.get(&AggregateKey::new(1, 3, 7)),
        Some(AggregateRow::new(10.0, 2))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_atomic_folds_lose_nothing() {
    let store = InMemoryRowStore::new();
    let key = AggregateKey::new(3, 12, 9);
    store.seed(key, AggregateRow::new(1.0, 1));
    let listener = started(&store, config(4)).await;

    let mut feeders = Vec::new();
    for _ in 0..8 {
        let listener = listener.clone();
        feeders.push(tokio::spawn(async move {
            for _ in 0..25 {
                let batch = (0..4).map(|_| reading(3, 12, 9, 1.0)).collect();
                let report = listener.process_batch(batch).await.unwrap();
                assert_eq!(report.folded, 4);
            }
        }));
    }
    for feeder in feeders {
        feeder.await.unwrap();
    }
    listener.close().await;

    assert_eq!(store.get(&key), Some(AggregateRow::new(801.0, 801)));
}

#[tokio::test]
async fn upsert_policy_creates_rows() {
    for fold_mode in [FoldMode::Atomic, FoldMode::ReadModifyWrite] {
        let store = InMemoryRowStore::new();
        let listener = started(
            &store,
            AggregatorConfig {
                fold_mode,
                missing_row: MissingRowPolicy::Upsert,
                workers: 1,
                ..AggregatorConfig::default()
            },
        )
        .await;

        let report = listener
            .process_batch(vec![reading(6, 95, 1, 2.5)])
            .await
            .unwrap();
        listener.close().await;

        assert_eq!(report.inserted, 1);
        assert_eq!(
            store.get(&AggregateKey::new(6, 95, 1)),
            Some(AggregateRow::new(2.5, 1))
        );
    }
}

#[tokio::test]
async fn strict_policy_reports_aborted_batch() {
    let store = InMemoryRowStore::new();
    store.seed(AggregateKey::new(1, 3, 7), AggregateRow::default());
    let listener = started(
        &store,
        AggregatorConfig {
            failure_policy: FailurePolicy::Strict,
            workers: 1,
            ..AggregatorConfig::default()
        },
    )
    .await;

    let mut invalid = reading(1, 3, 7, 0.0);
    invalid.fields.remove("value");
    let handled = listener
        .process_events(vec![invalid, reading(1, 3, 7, 5.0)])
        .await
        .unwrap();
    listener.close().await;

    assert!(!handled);
    assert_eq!(
        store.get(&AggregateKey::new(1, 3, 7)),
        Some(AggregateRow::default())
    );
}

#[tokio::test]
async fn processing_before_init_fails_fast() {
    let store = InMemoryRowStore::new();
    let listener = AggregationListener::new(Arc::new(store.clone()), config(1));

    let err = listener
        .process_events(vec![reading(1, 3, 7, 5.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::ConfigurationMissing));
    assert!(matches!(
        listener.start().await,
        Err(AggregatorError::ConfigurationMissing)
    ));
    assert_eq!(store.opened_total(), 0);
}

#[tokio::test]
async fn value_column_is_set_once() {
    let store = InMemoryRowStore::new();
    let listener = AggregationListener::new(Arc::new(store), config(1));

    assert!(matches!(
        listener.init(""),
        Err(AggregatorError::ConfigurationMissing)
    ));
    listener.init("cpu_load").unwrap();
    match listener.init("temperature") {
        Err(AggregatorError::AlreadyInitialized(current)) => assert_eq!(current, "cpu_load"),
        other => panic!("expected AlreadyInitialized, got {:?}", other),
    }
}

#[tokio::test]
async fn close_releases_every_connection_once() {
    let store = InMemoryRowStore::new();
    let listener = started(&store, config(3)).await;
    assert!(listener.is_running().await);
    assert_eq!(store.open_connections(), 3);

    listener.close().await;
    listener.close().await;

    assert!(!listener.is_running().await);
    assert_eq!(store.open_connections(), 0);
    assert_eq!(store.closed_total(), 3);
    assert!(matches!(
        listener.process_events(vec![reading(1, 3, 7, 5.0)]).await,
        Err(AggregatorError::NotStarted)
    ));
}

#[tokio::test]
async fn start_fails_when_connections_are_unavailable() {
    let store = InMemoryRowStore::with_max_connections(1);
    let listener = AggregationListener::new(Arc::new(store.clone()), config(2));
    listener.init("value").unwrap();

    assert!(matches!(
        listener.start().await,
        Err(AggregatorError::ConnectionFailure(_))
    ));
    assert!(!listener.is_running().await);
    assert_eq!(store.open_connections(), 0);
}
