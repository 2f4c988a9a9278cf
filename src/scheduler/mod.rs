//! Crawl task scheduling
//!
//! Runs a fixed set of crawl tasks forever, each re-run after a random delay
//! drawn from its own interval range, with at most K tasks running at once.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │  min-heap of (due, seq, task) │◄──────────────┐
//!            └──────────────┬───────────────┘               │
//!                           │ earliest due ≤ now            │ due = finish + sample()
//!                           ▼                               │
//!                  acquire permit (K total)                 │
//!                           │                               │
//!                           ▼                               │
//!                spawn run (panic-isolated) ── done channel ┘
//! ```
//!
//! The heap is owned by the scheduling loop alone. Finished runs come back
//! over a channel and are re-inserted on the next tick, so no lock is shared
//! between the loop and running tasks.
//!
//! # Example
//!
//! ```ignore
//! use jobscout::scheduler::{IntervalRange, Scheduler};
//!
//! let mut scheduler = Scheduler::new(5)?;
//! scheduler.schedule(task, IntervalRange::from_secs(120, 180)?);
//! scheduler.run(shutdown_rx).await?;
//! ```

pub mod error;
pub mod task;

pub use error::{SchedulerError, SchedulerResult};
pub use task::{CrawlTask, IntervalRange};

use futures::FutureExt;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::Instant;

/// Longest the loop sleeps before re-checking the heap
pub const MAX_IDLE_SLEEP: Duration = Duration::from_secs(1);

// ============================================================================
// Heap entries
// ============================================================================

/// A task waiting in the heap with its next eligible instant
struct ScheduledTask {
    due: Instant,
    /// Insertion order; breaks ties between equal due times
    seq: u64,
    task: Arc<dyn CrawlTask>,
    interval: IntervalRange,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// A finished run on its way back into the heap
struct Finished {
    due: Instant,
    task: Arc<dyn CrawlTask>,
    interval: IntervalRange,
}

/// What one [`Scheduler::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A task was started
    Dispatched,
    /// Nothing was due; the loop slept
    Idle,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Concurrency-capped scheduler for periodic crawl tasks
pub struct Scheduler {
    heap: BinaryHeap<Reverse<ScheduledTask>>,
    next_seq: u64,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    done_tx: mpsc::UnboundedSender<Finished>,
    done_rx: mpsc::UnboundedReceiver<Finished>,
}

impl Scheduler {
    /// Create a scheduler running at most `max_concurrent` tasks at once
    pub fn new(max_concurrent: usize) -> SchedulerResult<Self> {
        if max_concurrent == 0 {
            return Err(SchedulerError::InvalidConcurrency {
                value: max_concurrent,
            });
        }

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Ok(Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            done_tx,
            done_rx,
        })
    }

    /// Register a task, due immediately
    pub fn schedule(&mut self, task: Arc<dyn CrawlTask>, interval: IntervalRange) {
        tracing::debug!(
            task = task.name(),
            min_secs = interval.min().as_secs(),
            max_secs = interval.max().as_secs(),
            "Task scheduled"
        );
        self.push(Instant::now(), task, interval);
    }

    fn push(&mut self, due: Instant, task: Arc<dyn CrawlTask>, interval: IntervalRange) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledTask {
            due,
            seq,
            task,
            interval,
        }));
    }

    /// Tasks waiting in the heap
    pub fn pending(&self) -> usize {
        self.heap.len()
    }

    /// Tasks currently running
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Time until the earliest task is due, if any is waiting
    pub fn next_due_in(&self) -> Option<Duration> {
        self.heap
            .peek()
            .map(|Reverse(e)| e.due.saturating_duration_since(Instant::now()))
    }

    fn drain_finished(&mut self) {
        while let Ok(finished) = self.done_rx.try_recv() {
            self.push(finished.due, finished.task, finished.interval);
        }
    }

    /// One scheduling step
    ///
    /// Starts the earliest task if it is due (waiting for a free permit), or
    /// sleeps until it is due, capped at [`MAX_IDLE_SLEEP`].
    pub async fn tick(&mut self) -> SchedulerResult<TickOutcome> {
        self.drain_finished();

        let now = Instant::now();
        let wait = match self.heap.peek() {
            Some(Reverse(entry)) if entry.due <= now => None,
            Some(Reverse(entry)) => Some((entry.due - now).min(MAX_IDLE_SLEEP)),
            None => Some(MAX_IDLE_SLEEP),
        };

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
            return Ok(TickOutcome::Idle);
        }

        // Pop only once a permit is held, so cancelling here loses nothing
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::PermitsClosed)?;

        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(TickOutcome::Idle);
        };

        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let ScheduledTask { task, interval, .. } = entry;
            execute(task.as_ref()).await;

            let delay = interval.sample();
            tracing::debug!(
                task = task.name(),
                next_in_secs = delay.as_secs(),
                "Task rescheduled"
            );
            let _ = done_tx.send(Finished {
                due: Instant::now() + delay,
                task,
                interval,
            });
            // After the send: run() drains once every permit is back
            drop(permit);
        });

        Ok(TickOutcome::Dispatched)
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped), then
    /// wait for running tasks to finish
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        tracing::info!(
            tasks = self.heap.len(),
            max_concurrent = self.max_concurrent,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.tick() => {
                    result?;
                }
            }
        }

        let running = self.in_flight();
        tracing::info!(running, "Scheduler stopping, waiting for running tasks");
        let _all = Arc::clone(&self.permits)
            .acquire_many_owned(self.max_concurrent as u32)
            .await
            .map_err(|_| SchedulerError::PermitsClosed)?;
        self.drain_finished();

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

/// Run a task once, isolating errors and panics
async fn execute(task: &dyn CrawlTask) {
    let name = task.name().to_string();
    let run_id = uuid::Uuid::new_v4();
    let started = Instant::now();
    let _timer = crate::metrics::start_task_run(&name);

    tracing::info!(task = %name, %run_id, "Task run started");

    match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(Ok(report)) => {
            crate::metrics::finish_task_run(&name, None);
            tracing::info!(
                task = %name,
                %run_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                %report,
                "Task run finished"
            );
        }
        Ok(Err(e)) => {
            crate::metrics::finish_task_run(&name, Some("error"));
            tracing::error!(task = %name, %run_id, error = %e, "Task run failed");
        }
        Err(panic) => {
            crate::metrics::finish_task_run(&name, Some("panic"));
            let err = SchedulerError::task_panicked(&name, panic_message(panic.as_ref()));
            tracing::error!(task = %name, %run_id, error = %err, "Task run panicked");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic payload")
    }
}
