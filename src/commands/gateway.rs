use anyhow::{Context, Result};
use std::sync::Arc;

use jobscout::config::Config;
use jobscout::gateway::{GatewayServer, RedisSeenKeys, SeenKeys};
use jobscout::transport::{RedisTransport, Transport};
use jobscout::utils::retry::{with_retry, RetryConfig};

use super::shutdown_signal;

/// Serve the intake gateway until Ctrl+C
pub async fn gateway(config: Config) -> Result<()> {
    let retry = RetryConfig::fixed(
        config.transport.connect_attempts,
        config.transport.connect_delay(),
    );

    let redis_url = config.gateway_redis_url().to_string();
    let keys: Arc<dyn SeenKeys> = Arc::new(
        with_retry(&retry, || {
            let redis_url = redis_url.clone();
            async move { Ok(RedisSeenKeys::connect(&redis_url).await?) }
        })
        .await
        .context("Could not connect to Redis")?,
    );

    let transport_config = config.transport.clone();
    let transport: Arc<dyn Transport> = Arc::new(
        with_retry(&retry, || {
            let transport_config = transport_config.clone();
            async move { Ok(RedisTransport::connect(&transport_config).await?) }
        })
        .await
        .context("Could not connect to the intake transport")?,
    );

    let server = GatewayServer::new(config.gateway.clone(), keys, Arc::clone(&transport));

    println!("Intake Gateway");
    println!("{:-<40}", "");
    println!("  Bind Address: {}", config.gateway.bind_address);
    println!("  Queue:        {}", config.transport.queue);
    println!();
    println!("API Endpoints:");
    println!("  GET  /check?key=<id>  - 200 unseen, 409 seen");
    println!("  POST /checked         - Mark an id seen");
    println!("  POST /submit          - Mark seen and enqueue a posting");
    println!("  GET  /healthcheck     - Redis connectivity");
    println!("  GET  /metrics         - Prometheus metrics");
    println!();

    server.start_with_shutdown(shutdown_signal()).await?;
    transport.close().await;

    println!("Gateway stopped.");
    Ok(())
}
