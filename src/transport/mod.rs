//! Intake transport: the durable queue between the gateway and the consumer
//!
//! The production transport is a reliable queue on Redis lists
//! ([`RedisTransport`]); [`MemoryTransport`] implements the same contract
//! in-process for tests.
//!
//! Delivery contract:
//! - [`Transport::receive`] hands out one message at a time; it stays
//!   unacknowledged until [`Transport::ack`] or [`Transport::dead_letter`]
//! - [`Transport::recover_unacked`] returns messages a crashed consumer left
//!   unacknowledged to the head of the queue
//! - errors from a live connection are recoverable through
//!   [`Transport::reconnect`]

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;

use crate::utils::error::TransportError;

pub use self::memory::MemoryTransport;
pub use self::redis::RedisTransport;

/// One inbound message awaiting acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Raw payload, also the handle used to acknowledge it
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Durable FIFO queue with explicit acknowledgement
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue name, used in logs and metrics
    fn queue(&self) -> &str;

    /// Append a message to the queue
    async fn publish(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next message; `None` when none arrived within the
    /// transport's receive window
    async fn receive(&self) -> Result<Option<InboundMessage>, TransportError>;

    /// Acknowledge a received message
    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Move a received message to the dead-letter list
    async fn dead_letter(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Return unacknowledged messages to the queue; returns how many
    async fn recover_unacked(&self) -> Result<usize, TransportError>;

    /// Re-establish the connection
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Release the connection
    async fn close(&self);
}
