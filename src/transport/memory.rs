//! In-process transport with the same delivery contract as the Redis one

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::{InboundMessage, Transport};
use crate::utils::error::TransportError;

#[derive(Debug, Default)]
struct Lists {
    pending: VecDeque<Bytes>,
    processing: Vec<Bytes>,
    dead: Vec<Bytes>,
    acked: Vec<Bytes>,
    closed: bool,
}

/// [`Transport`] kept in memory, with failure injection for tests
#[derive(Debug)]
pub struct MemoryTransport {
    queue: String,
    lists: Mutex<Lists>,
    arrived: Notify,
    receive_timeout: Duration,
    /// Remaining receive calls that fail as a dropped connection
    failures: AtomicU32,
    /// Receives and reconnects fail while set
    link_down: AtomicBool,
    reconnects: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            lists: Mutex::new(Lists::default()),
            arrived: Notify::new(),
            receive_timeout: Duration::from_millis(100),
            failures: AtomicU32::new(0),
            link_down: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
        }
    }

    /// How long `receive` waits before returning `None`
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Make the next `count` receive calls fail as if the connection dropped
    pub fn fail_next_receives(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Take the broker offline: receives and reconnects fail until restored
    pub fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::SeqCst);
    }

    /// Messages delivered but not yet acknowledged
    pub fn unacked(&self) -> Vec<Bytes> {
        self.lock().processing.clone()
    }

    /// Messages moved to the dead-letter list
    pub fn dead_letters(&self) -> Vec<Bytes> {
        self.lock().dead.clone()
    }

    /// Messages acknowledged so far
    pub fn acked(&self) -> Vec<Bytes> {
        self.lock().acked.clone()
    }

    /// Messages waiting in the queue
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Successful `reconnect` calls
    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_next(&self) -> Result<Option<InboundMessage>, TransportError> {
        let mut lists = self.lock();
        if lists.closed {
            return Err(TransportError::Closed);
        }
        Ok(lists.pending.pop_front().map(|payload| {
            lists.processing.push(payload.clone());
            InboundMessage { payload }
        }))
    }

    fn remove_processing(lists: &mut Lists, payload: &Bytes) -> bool {
        match lists.processing.iter().position(|p| p == payload) {
            Some(pos) => {
                lists.processing.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), TransportError> {
        {
            let mut lists = self.lock();
            if lists.closed {
                return Err(TransportError::Closed);
            }
            lists.pending.push_back(Bytes::copy_from_slice(payload));
        }
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<InboundMessage>, TransportError> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("connection reset by peer".into()));
        }

        let notified = self.arrived.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(message) = self.take_next()? {
            return Ok(Some(message));
        }

        let _ = tokio::time::timeout(self.receive_timeout, notified).await;
        self.take_next()
    }

    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let mut lists = self.lock();
        if Self::remove_processing(&mut lists, &message.payload) {
            lists.acked.push(message.payload.clone());
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let mut lists = self.lock();
        Self::remove_processing(&mut lists, &message.payload);
        lists.dead.push(message.payload.clone());
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, TransportError> {
        let mut lists = self.lock();
        let unacked: Vec<Bytes> = lists.processing.drain(..).collect();
        let count = unacked.len();
        for payload in unacked.into_iter().rev() {
            lists.pending.push_front(payload);
        }
        Ok(count)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        self.lock().closed = false;
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_waiters();
    }
}
