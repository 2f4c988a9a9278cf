use anyhow::{Context, Result};
use std::sync::Arc;

use jobscout::config::{Config, NotificationKind};
use jobscout::llm::{per_minute_limiter, Evaluator, OllamaEvaluator, RateLimitedEvaluator};
use jobscout::notifications::{NotificationSink, RedisTopicPublisher, WebhookConfig, WebhookPublisher};
use jobscout::pipeline::Pipeline;
use jobscout::storage::{PostgresPostingStore, PostingStore};
use jobscout::transport::{RedisTransport, Transport};
use jobscout::utils::retry::{with_retry, RetryConfig};

use super::shutdown_signal;

/// Run the intake consumer and processing stages until Ctrl+C
pub async fn consume(config: Config) -> Result<()> {
    let transport_config = config.transport.clone();
    let retry = RetryConfig::fixed(transport_config.connect_attempts, transport_config.connect_delay());
    let transport: Arc<dyn Transport> = Arc::new(
        with_retry(&retry, || {
            let transport_config = transport_config.clone();
            async move { Ok(RedisTransport::connect(&transport_config).await?) }
        })
        .await
        .context("Could not connect to the intake transport")?,
    );

    let ollama = OllamaEvaluator::new(config.evaluator.clone())
        .context("Failed to create evaluator client")?;
    if !ollama.is_available().await {
        tracing::warn!(endpoint = %config.evaluator.endpoint, "Evaluator endpoint not reachable yet");
    }
    let evaluator: Arc<dyn Evaluator> = Arc::new(RateLimitedEvaluator::new(
        Arc::new(ollama),
        per_minute_limiter(config.evaluator.rate_limit_per_minute),
    ));

    let sink: Arc<dyn NotificationSink> = match config.notification.kind {
        NotificationKind::Redis => Arc::new(
            RedisTopicPublisher::connect(config.notification_redis_url())
                .await
                .context("Failed to connect notification publisher")?,
        ),
        NotificationKind::Webhook => {
            let url = config
                .notification
                .webhook_url
                .clone()
                .context("notification.webhook_url is not set")?;
            Arc::new(WebhookPublisher::new(
                WebhookConfig::new(url).with_timeout(config.notification.timeout_secs),
            )?)
        }
    };

    let postgres = PostgresPostingStore::new(&config.persistence)?;
    postgres
        .ensure_schema()
        .await
        .context("Failed to prepare the postings table")?;
    let store: Arc<dyn PostingStore> = Arc::new(postgres);

    let coordinator = Pipeline::new(config.pipeline.clone(), transport, evaluator, sink, store)
        .with_topic(config.notification.topic.clone())
        .with_reconnect_delay(config.transport.reconnect_delay())
        .start();

    println!(
        "Consuming queue '{}' (notify: {:?} '{}'). Press Ctrl+C to stop.",
        config.transport.queue, config.notification.kind, config.notification.topic
    );

    shutdown_signal().await;
    println!("Draining pipeline...");
    let stats = coordinator.shutdown().await;

    println!();
    println!("Pipeline Summary");
    println!("================");
    println!("  Received:      {}", stats.received);
    println!("  Dead-lettered: {}", stats.dead_lettered);
    println!("  Evicted:       {}", stats.evicted);
    println!(
        "  Qualified:     {} ({:.1}%)",
        stats.qualified,
        stats.qualification_rate() * 100.0
    );
    println!("  Unqualified:   {}", stats.unqualified);
    println!("  Notified:      {}", stats.notified);
    println!("  Persisted:     {}", stats.persisted);
    println!("  Retries:       {}", stats.retries);
    if stats.dropped_after_stop > 0 {
        println!("  Dropped at exit: {}", stats.dropped_after_stop);
    }
    Ok(())
}
