//! Bounded FIFO queue connecting two pipeline stages
//!
//! Each queue has a capacity and an overflow policy:
//!
//! - [`Overflow::Block`]: producers wait for space. A consumer that has taken
//!   an item keeps its slot until [`StageQueue::task_done`] or
//!   [`StageQueue::requeue`], so a worker putting its own item back never
//!   waits on itself.
//! - [`Overflow::DropOldest`]: a full queue evicts its oldest item to admit the
//!   new one. The evicted item is handed back to the caller for logging. A
//!   full queue holding only stop markers refuses the new item instead.
//!
//! The queue tracks unfinished work so that [`StageQueue::join`] returns once
//! every admitted item (stop marker included) has been marked done. Once the
//! consuming worker has seen the stop marker it closes the queue; anything
//! left or arriving later is refused and `join` never hangs.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// What a consumer receives from a queue
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    /// A work item
    Item(T),
    /// Stop marker: the consumer finishes after this
    Stop,
}

/// Behavior of [`StageQueue::put`] on a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Wait for space
    Block,
    /// Evict the oldest waiting item
    DropOldest,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<Delivery<T>>,
    /// Items taken by the consumer and not yet done or requeued
    in_flight: usize,
    /// Items admitted and not yet done (stop markers included)
    unfinished: usize,
    closed: bool,
}

/// Bounded FIFO between two stages
#[derive(Debug)]
pub struct StageQueue<T> {
    name: String,
    capacity: usize,
    overflow: Overflow,
    state: Mutex<QueueState<T>>,
    item_added: Notify,
    slot_freed: Notify,
    all_done: Notify,
}

impl<T> StageQueue<T> {
    /// Create a queue; a capacity of 0 is treated as 1
    pub fn new(name: impl Into<String>, capacity: usize, overflow: Overflow) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            overflow,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                in_flight: 0,
                unfinished: 0,
                closed: false,
            }),
            item_added: Notify::new(),
            slot_freed: Notify::new(),
            all_done: Notify::new(),
        }
    }

    /// Queue name, used in logs and metrics
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    /// Number of waiting deliveries (stop markers included)
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer has closed the queue
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        // A poisoned lock only means a holder panicked mid-update of plain counters
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_room(&self, state: &QueueState<T>) -> bool {
        match self.overflow {
            Overflow::Block => state.items.len() + state.in_flight < self.capacity,
            Overflow::DropOldest => state.items.len() < self.capacity,
        }
    }

    /// Evict the oldest work item, never a stop marker
    fn evict_oldest(state: &mut QueueState<T>) -> Option<T> {
        let pos = state
            .items
            .iter()
            .position(|d| matches!(d, Delivery::Item(_)))?;
        match state.items.remove(pos) {
            Some(Delivery::Item(item)) => Some(item),
            _ => None,
        }
    }

    fn drop_closed(&self, what: &str) {
        tracing::warn!(queue = %self.name, what, "Queue closed, dropping item");
    }

    /// Admit an item
    ///
    /// Under [`Overflow::Block`] this waits for space. Under
    /// [`Overflow::DropOldest`] it never waits and returns the item dropped to
    /// stay within capacity, if any: the oldest waiting item, or `item`
    /// itself when only stop markers are waiting.
    pub async fn put(&self, item: T) -> Option<T> {
        if self.overflow == Overflow::DropOldest {
            return self.put_evicting(item);
        }

        loop {
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    drop(state);
                    self.drop_closed("put");
                    return None;
                }
                if self.has_room(&state) {
                    state.items.push_back(Delivery::Item(item));
                    state.unfinished += 1;
                    drop(state);
                    self.item_added.notify_waiters();
                    return None;
                }
            }

            notified.await;
        }
    }

    fn put_evicting(&self, item: T) -> Option<T> {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            self.drop_closed("put");
            return None;
        }

        let evicted = if state.items.len() >= self.capacity {
            match Self::evict_oldest(&mut state) {
                Some(oldest) => Some(oldest),
                None => return Some(item),
            }
        } else {
            state.unfinished += 1;
            None
        };
        state.items.push_back(Delivery::Item(item));
        drop(state);

        self.item_added.notify_waiters();
        evicted
    }

    /// Enqueue a stop marker, waiting for space; never evicts
    pub async fn put_stop(&self) {
        loop {
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return;
                }
                if self.has_room(&state) {
                    state.items.push_back(Delivery::Stop);
                    state.unfinished += 1;
                    drop(state);
                    self.item_added.notify_waiters();
                    return;
                }
            }

            notified.await;
        }
    }

    /// Take the oldest delivery, waiting while the queue is empty
    pub async fn get(&self) -> Delivery<T> {
        loop {
            let notified = self.item_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_get() {
                return delivery;
            }

            notified.await;
        }
    }

    /// Take the oldest delivery without waiting
    pub fn try_get(&self) -> Option<Delivery<T>> {
        let mut state = self.lock();
        let delivery = state.items.pop_front()?;
        state.in_flight += 1;
        drop(state);

        // DropOldest admission counts waiting items only
        if self.overflow == Overflow::DropOldest {
            self.slot_freed.notify_waiters();
        }
        Some(delivery)
    }

    /// Mark a taken delivery as finished
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.unfinished = state.unfinished.saturating_sub(1);
        let finished = state.unfinished == 0;
        drop(state);

        self.slot_freed.notify_waiters();
        if finished {
            self.all_done.notify_waiters();
        }
    }

    /// Put a taken item back at the tail without waiting
    ///
    /// The item reuses the slot its consumer held. Under
    /// [`Overflow::DropOldest`] the queue may still be full of newer items,
    /// in which case the oldest one is evicted and returned as `Ok(Some(_))`.
    /// A closed queue, or a full one holding only stop markers, refuses the
    /// item and hands it back as `Err`; it counts as finished.
    pub fn requeue(&self, item: T) -> Result<Option<T>, T> {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        let full = self.overflow == Overflow::DropOldest && state.items.len() >= self.capacity;
        let evicted = if full && !state.closed {
            Self::evict_oldest(&mut state)
        } else {
            None
        };

        if state.closed || (full && evicted.is_none()) {
            state.unfinished = state.unfinished.saturating_sub(1);
            let finished = state.unfinished == 0;
            drop(state);
            if finished {
                self.all_done.notify_waiters();
            }
            return Err(item);
        }

        if evicted.is_some() {
            state.unfinished = state.unfinished.saturating_sub(1);
        }
        state.items.push_back(Delivery::Item(item));
        drop(state);

        self.item_added.notify_waiters();
        Ok(evicted)
    }

    /// Close the queue: drop everything still waiting and refuse new items
    ///
    /// Returns the work items that were still waiting.
    pub fn close(&self) -> Vec<T> {
        let mut state = self.lock();
        state.closed = true;
        let waiting: Vec<_> = state.items.drain(..).collect();
        state.unfinished = state.unfinished.saturating_sub(waiting.len());
        let finished = state.unfinished == 0;
        drop(state);

        self.slot_freed.notify_waiters();
        if finished {
            self.all_done.notify_waiters();
        }
        waiting
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Item(item) => Some(item),
                Delivery::Stop => None,
            })
            .collect()
    }

    /// Wait until every admitted delivery has been marked done
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().unfinished == 0 {
                return;
            }

            notified.await;
        }
    }
}
