//! Intake gateway: the HTTP dedup store in front of Redis and the transport
//!
//! Crawl tasks talk to this service through [`crate::storage::HttpDedupStore`].
//! Seen ids live as plain Redis keys; submitted postings are also published
//! to the intake transport for the consumer.

pub mod api;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::transport::Transport;

use api::create_router;

// ============================================================================
// Seen keys
// ============================================================================

/// Key-value store remembering seen posting ids
#[async_trait]
pub trait SeenKeys: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, GatewayError>;

    async fn insert(&self, key: &str, value: &str) -> Result<(), GatewayError>;

    /// Connectivity check
    async fn ping(&self) -> Result<(), GatewayError>;
}

/// [`SeenKeys`] in Redis, through a connection pool
pub struct RedisSeenKeys {
    pool: Pool,
}

impl RedisSeenKeys {
    /// Create the pool and check connectivity
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let pool = PoolConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| GatewayError::Pool(e.to_string()))?;
        let keys = Self { pool };
        keys.ping().await?;
        tracing::info!(url = %redact(url), "Connected to Redis");
        Ok(keys)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, GatewayError> {
        self.pool
            .get()
            .await
            .map_err(|e| GatewayError::Pool(e.to_string()))
    }
}

#[async_trait]
impl SeenKeys for RedisSeenKeys {
    async fn exists(&self, key: &str) -> Result<bool, GatewayError> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn insert(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
        if pong != "PONG" {
            return Err(GatewayError::Pool(format!("unexpected PING reply '{pong}'")));
        }
        Ok(())
    }
}

/// Strip credentials from a Redis URL for logging
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// In-memory [`SeenKeys`] for tests
#[derive(Debug, Default)]
pub struct MemorySeenKeys {
    keys: Mutex<HashMap<String, String>>,
}

impl MemorySeenKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value for `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.keys.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl SeenKeys for MemorySeenKeys {
    async fn exists(&self, key: &str) -> Result<bool, GatewayError> {
        Ok(self.get(key).is_some())
    }

    async fn insert(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        self.keys
            .lock()
            .map_err(|_| GatewayError::Pool("memory key store lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

// ============================================================================
// Server
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<dyn SeenKeys>,
    pub transport: Arc<dyn Transport>,
    pub start_time: Instant,
}

/// Gateway HTTP server
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, keys: Arc<dyn SeenKeys>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            state: AppState {
                keys,
                transport,
                start_time: Instant::now(),
            },
        }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> axum::Router {
        let mut router = create_router(self.state.clone());
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        router
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| GatewayError::Bind(format!("{}: {e}", self.config.bind_address)))?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))
    }

    /// Serve on `listener` until `shutdown_signal` resolves
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let router = self.build_router();
        let addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Bind(e.to_string()))?;
        tracing::info!(%addr, queue = %self.state.transport.queue(), "Gateway listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| GatewayError::Serve(e.to_string()))?;

        tracing::info!("Gateway shutdown complete");
        Ok(())
    }

    /// Bind and serve with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal).await
    }
}

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Failed to bind: {0}")]
    Bind(String),

    #[error("Server error: {0}")]
    Serve(String),
}
