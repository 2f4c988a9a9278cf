//! Pipeline integration tests
//!
//! Runs the full intake → classification → notification/persistence chain
//! over an in-memory transport with paused time.

use std::sync::Arc;
use std::time::Duration;

use jobscout::models::Posting;
use jobscout::notifications::MemoryPublisher;
use jobscout::pipeline::{Delivery, Overflow, Pipeline, StageQueue};
use jobscout::storage::{MemoryPostingStore, PostingStore};
use jobscout::transport::{MemoryTransport, Transport};

use super::fixtures::{
    fast_pipeline_config, posting, EventLog, LoggingSink, ScriptedEvaluator, SlowStore,
};

async fn publish(transport: &MemoryTransport, posting: &Posting) {
    let payload = serde_json::to_vec(posting).unwrap();
    transport.publish(&payload).await.unwrap();
}

/// Poll `condition` every 100ms of (paused) time, up to `limit`
async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}

#[tokio::test(start_paused = true)]
async fn test_qualified_posting_reaches_both_sinks() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let sink = Arc::new(LoggingSink::new(log.clone()));
    let store = Arc::new(MemoryPostingStore::new());

    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Software", log.clone())),
        sink.clone(),
        store.clone(),
    )
    .with_topic("qualified-jobs")
    .start();

    let posting = posting("42_apple", "Software Engineer", "2 years experience, remote");
    publish(&transport, &posting).await;

    assert!(wait_until(Duration::from_secs(10), || store.len() == 1).await);
    let stats = coordinator.shutdown().await;

    let published = sink.inner.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "qualified-jobs");

    let notified: Posting = serde_json::from_str(&published[0].payload).unwrap();
    let evaluation = notified.evaluation.clone().unwrap();
    assert!(evaluation.is_qualified);

    let stored = store.get("42_apple").await.unwrap().unwrap();
    assert_eq!(stored.reasoning, evaluation.reasoning);
    assert_eq!(stored.is_qualified, evaluation.is_qualified);
    assert_eq!(stored.title, posting.title);
    assert!(!stored.processed);

    assert_eq!(stats.received, 1);
    assert_eq!(stats.qualified, 1);
    assert_eq!(stats.notified, 1);
    assert_eq!(stats.persisted, 1);
    assert!(transport.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_failure_retried_before_single_publish() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let sink = Arc::new(LoggingSink::new(log.clone()));
    let store = Arc::new(MemoryPostingStore::new());
    let evaluator = ScriptedEvaluator::new("Junior", log.clone()).failing("Junior Developer", 1);

    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(evaluator),
        sink.clone(),
        store.clone(),
    )
    .start();

    publish(&transport, &posting("7_indeed", "Junior Developer", "new grads welcome")).await;

    assert!(wait_until(Duration::from_secs(10), || store.len() == 1).await);
    let stats = coordinator.shutdown().await;

    assert_eq!(
        log.events(),
        vec![
            "evaluate-failed:Junior Developer".to_string(),
            "evaluate-ok:Junior Developer".to_string(),
            "publish:7_indeed".to_string(),
        ]
    );
    assert_eq!(sink.inner.published().len(), 1);
    assert_eq!(stats.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unqualified_postings_reach_no_sink() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let sink = Arc::new(MemoryPublisher::new());
    let store = Arc::new(MemoryPostingStore::new());

    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Junior", log.clone())),
        sink.clone(),
        store.clone(),
    )
    .start();

    publish(&transport, &posting("1_a", "Staff Engineer", "10 years")).await;
    publish(&transport, &posting("2_a", "Principal Engineer", "15 years")).await;

    assert!(wait_until(Duration::from_secs(10), || log.events().len() == 2).await);
    let stats = coordinator.shutdown().await;

    assert!(sink.published().is_empty());
    assert!(store.is_empty());
    assert_eq!(stats.unqualified, 2);
    assert_eq!(stats.qualification_rate(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_persistence_blocks_without_dropping() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let sink = Arc::new(MemoryPublisher::new());
    let store = Arc::new(SlowStore::new(Duration::from_secs(2)));

    let coordinator = Pipeline::new(
        fast_pipeline_config(100),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Junior", log.clone())),
        sink.clone(),
        store.clone(),
    )
    .start();

    for i in 0..10 {
        publish(&transport, &posting(&format!("{i}_a"), "Junior Engineer", "d")).await;
    }

    assert!(wait_until(Duration::from_secs(60), || store.inner.len() == 10).await);
    let stats = coordinator.shutdown().await;

    assert_eq!(sink.published().len(), 10);
    assert_eq!(stats.persisted, 10);
    assert_eq!(stats.evicted, 0);
    assert_eq!(stats.dropped_after_stop, 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_dead_lettered_pipeline_continues() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let store = Arc::new(MemoryPostingStore::new());

    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Junior", log.clone())),
        Arc::new(MemoryPublisher::new()),
        store.clone(),
    )
    .start();

    transport.publish(b"<html>not a posting</html>").await.unwrap();
    publish(&transport, &posting("3_a", "Junior Engineer", "d")).await;

    assert!(wait_until(Duration::from_secs(10), || store.len() == 1).await);
    let stats = coordinator.shutdown().await;

    assert_eq!(transport.dead_letters().len(), 1);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.received, 2);
}

#[tokio::test]
async fn test_intake_queue_keeps_newest_when_full() {
    let queue = StageQueue::new("classification", 2, Overflow::DropOldest);
    let a = posting("A", "t", "d");
    let b = posting("B", "t", "d");
    let c = posting("C", "t", "d");

    assert!(queue.put(a).await.is_none());
    assert!(queue.put(b).await.is_none());
    let evicted = queue.put(c).await.unwrap();
    assert_eq!(evicted.id, "A");

    let mut remaining = Vec::new();
    while let Some(Delivery::Item(p)) = queue.try_get() {
        remaining.push(p.id);
        queue.task_done();
    }
    assert_eq!(remaining, vec!["B", "C"]);
}
