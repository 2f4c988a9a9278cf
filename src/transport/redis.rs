//! Reliable queue on Redis lists
//!
//! Keys for a queue named `jobs`:
//!
//! | key               | role                                        |
//! |-------------------|---------------------------------------------|
//! | `jobs`            | pending messages, LPUSH in / consumed RIGHT |
//! | `jobs:processing` | delivered but unacknowledged (BLMOVE)       |
//! | `jobs:dead`       | messages that failed to decode              |
//!
//! Every command runs under a watchdog so a half-open connection surfaces
//! as [`TransportError::Timeout`] instead of hanging the consumer.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, FromRedisValue, Pipeline, RedisError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{InboundMessage, Transport};
use crate::config::TransportConfig;
use crate::utils::error::TransportError;

/// Redis list names derived from the queue name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub pending: String,
    pub processing: String,
    pub dead: String,
}

impl QueueKeys {
    pub fn new(queue: &str) -> Self {
        Self {
            pending: queue.to_string(),
            processing: format!("{queue}:processing"),
            dead: format!("{queue}:dead"),
        }
    }
}

/// [`Transport`] on Redis lists
pub struct RedisTransport {
    client: Client,
    conn: RwLock<Option<ConnectionManager>>,
    keys: QueueKeys,
    receive_timeout: Duration,
    heartbeat: Duration,
}

fn classify(command: &'static str, err: RedisError) -> TransportError {
    match TransportError::from(err) {
        TransportError::Command { reason, .. } => TransportError::Command { command, reason },
        other => other,
    }
}

impl RedisTransport {
    /// Connect once; callers wrap this in their own retry policy
    pub async fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let transport = Self {
            client,
            conn: RwLock::new(None),
            keys: QueueKeys::new(&config.queue),
            receive_timeout: Duration::from_secs(config.receive_timeout_secs.max(1)),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
        };
        transport.reconnect().await?;

        tracing::info!(queue = %config.queue, "Transport connected");
        Ok(transport)
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    async fn connection(&self) -> Result<ConnectionManager, TransportError> {
        self.conn.read().await.clone().ok_or(TransportError::Closed)
    }

    async fn query<T: FromRedisValue>(
        &self,
        command: &'static str,
        cmd: &Cmd,
        window: Duration,
    ) -> Result<T, TransportError> {
        let mut conn = self.connection().await?;
        match tokio::time::timeout(window, cmd.query_async(&mut conn)).await {
            Err(_) => Err(TransportError::Timeout(window.as_secs())),
            Ok(result) => result.map_err(|e| classify(command, e)),
        }
    }

    async fn query_pipe(&self, command: &'static str, pipe: &Pipeline) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        let outcome: Result<::redis::RedisResult<()>, _> =
            tokio::time::timeout(self.heartbeat, pipe.query_async(&mut conn)).await;
        match outcome {
            Err(_) => Err(TransportError::Timeout(self.heartbeat.as_secs())),
            Ok(result) => result.map_err(|e| classify(command, e)),
        }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn queue(&self) -> &str {
        &self.keys.pending
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut cmd = ::redis::cmd("LPUSH");
        cmd.arg(&self.keys.pending).arg(payload);
        let _: i64 = self.query("LPUSH", &cmd, self.heartbeat).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<InboundMessage>, TransportError> {
        let mut cmd = ::redis::cmd("BLMOVE");
        cmd.arg(&self.keys.pending)
            .arg(&self.keys.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(self.receive_timeout.as_secs());

        let payload: Option<Vec<u8>> = self
            .query("BLMOVE", &cmd, self.receive_timeout + self.heartbeat)
            .await?;
        Ok(payload.map(InboundMessage::new))
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let mut cmd = ::redis::cmd("LREM");
        cmd.arg(&self.keys.processing)
            .arg(1)
            .arg(message.payload.as_ref());
        let _: i64 = self.query("LREM", &cmd, self.heartbeat).await?;
        Ok(())
    }

    async fn dead_letter(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .cmd("LPUSH")
            .arg(&self.keys.dead)
            .arg(message.payload.as_ref())
            .ignore()
            .cmd("LREM")
            .arg(&self.keys.processing)
            .arg(1)
            .arg(message.payload.as_ref())
            .ignore();
        self.query_pipe("DEADLETTER", &pipe).await
    }

    async fn recover_unacked(&self) -> Result<usize, TransportError> {
        // Newest first from the left, each onto the consuming end: order is kept
        let mut recovered = 0;
        loop {
            let mut cmd = ::redis::cmd("LMOVE");
            cmd.arg(&self.keys.processing)
                .arg(&self.keys.pending)
                .arg("LEFT")
                .arg("RIGHT");
            let moved: Option<Vec<u8>> = self.query("LMOVE", &cmd, self.heartbeat).await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(queue = %self.keys.pending, recovered, "Recovered unacknowledged messages");
        }
        Ok(recovered)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let mut conn = tokio::time::timeout(
            self.heartbeat,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.heartbeat.as_secs()))?
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        *self.conn.write().await = Some(conn);
        Ok(())
    }

    async fn close(&self) {
        if self.conn.write().await.take().is_some() {
            tracing::info!(queue = %self.keys.pending, "Transport closed");
        }
    }
}
