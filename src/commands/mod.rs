pub mod consume;
pub mod crawl;
pub mod gateway;
pub mod review;

pub use consume::consume;
pub use crawl::crawl;
pub use gateway::gateway;
pub use review::{review, ReviewAction};

/// Resolve on Ctrl+C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
}
