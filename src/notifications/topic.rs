//! Redis pub/sub notification sink

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;

use super::NotificationSink;
use crate::utils::error::SinkError;

/// [`NotificationSink`] publishing on a Redis channel named after the topic
pub struct RedisTopicPublisher {
    conn: ConnectionManager,
}

impl RedisTopicPublisher {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl NotificationSink for RedisTopicPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        if receivers == 0 {
            tracing::debug!(topic, "Published with no subscribers");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
