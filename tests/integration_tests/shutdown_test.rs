//! Shutdown drain tests

use std::sync::Arc;
use std::time::Duration;

use jobscout::notifications::MemoryPublisher;
use jobscout::pipeline::Pipeline;
use jobscout::storage::MemoryPostingStore;
use jobscout::transport::{MemoryTransport, Transport};

use super::fixtures::{fast_pipeline_config, posting, EventLog, ScriptedEvaluator};

async fn wait_for_acks(transport: &MemoryTransport, count: usize) {
    while transport.acked().len() < count {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_pipeline_stops_promptly() {
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Junior", EventLog::default())),
        Arc::new(MemoryPublisher::new()),
        Arc::new(MemoryPostingStore::new()),
    )
    .start();

    let stats = tokio::time::timeout(Duration::from_secs(5), coordinator.shutdown())
        .await
        .expect("shutdown should not hang");

    assert_eq!(stats.received, 0);
    assert!(transport.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_backlog_drains_through_every_stage() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let sink = Arc::new(MemoryPublisher::new());
    let store = Arc::new(MemoryPostingStore::new());
    let evaluator = ScriptedEvaluator::new("Junior", log.clone()).with_delay(Duration::from_secs(1));

    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(evaluator),
        sink.clone(),
        store.clone(),
    )
    .start();

    for i in 0..6 {
        let title = if i % 2 == 0 { "Junior Engineer" } else { "Staff Engineer" };
        let payload = serde_json::to_vec(&posting(&format!("{i}_a"), title, "d")).unwrap();
        transport.publish(&payload).await.unwrap();
    }
    wait_for_acks(&transport, 6).await;

    // Most postings are still waiting for classification here
    let stats = tokio::time::timeout(Duration::from_secs(60), coordinator.shutdown())
        .await
        .expect("shutdown should not hang");

    assert_eq!(log.events().len(), 6);
    assert_eq!(stats.qualified, 3);
    assert_eq!(stats.unqualified, 3);
    // Copies fanned out during the drain reached both sinks
    assert_eq!(sink.published().len(), 3);
    assert_eq!(store.len(), 3);
    assert_eq!(stats.dropped_after_stop, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_racing_stop_marker_does_not_hang() {
    let log = EventLog::default();
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let store = Arc::new(MemoryPostingStore::new());
    let evaluator = ScriptedEvaluator::new("Junior", log.clone()).failing("Junior Engineer", 1);

    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(evaluator),
        Arc::new(MemoryPublisher::new()),
        store.clone(),
    )
    .start();

    let payload = serde_json::to_vec(&posting("9_a", "Junior Engineer", "d")).unwrap();
    transport.publish(&payload).await.unwrap();
    wait_for_acks(&transport, 1).await;
    while log.events().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The worker is sleeping before its requeue; the stop marker gets in first
    let stats = tokio::time::timeout(Duration::from_secs(30), coordinator.shutdown())
        .await
        .expect("shutdown should not hang");

    assert_eq!(stats.retries, 1);
    assert_eq!(stats.dropped_after_stop, 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_completes_during_transport_outage() {
    let transport = Arc::new(MemoryTransport::new("jobs"));
    let coordinator = Pipeline::new(
        fast_pipeline_config(10),
        transport.clone(),
        Arc::new(ScriptedEvaluator::new("Junior", EventLog::default())),
        Arc::new(MemoryPublisher::new()),
        Arc::new(MemoryPostingStore::new()),
    )
    .start();

    // Broker unreachable: intake is stuck retrying its reconnect
    transport.set_link_down(true);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let stats = tokio::time::timeout(Duration::from_secs(60), coordinator.shutdown())
        .await
        .expect("shutdown should not wait for the broker");

    assert_eq!(stats.received, 0);
    assert_eq!(transport.reconnects(), 0);
}
