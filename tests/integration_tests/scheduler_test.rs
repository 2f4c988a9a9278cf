//! Scheduler integration tests
//!
//! Verifies the concurrency bound and that failing tasks keep their
//! schedule, using paused time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use jobscout::models::CrawlReport;
use jobscout::scheduler::{CrawlTask, IntervalRange, Scheduler};

/// Shared gauge of concurrently running task bodies
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct BusyTask {
    name: String,
    work: Duration,
    fail: bool,
    gauge: Arc<Gauge>,
    starts: Mutex<Vec<Instant>>,
}

impl BusyTask {
    fn new(name: &str, work: Duration, fail: bool, gauge: Arc<Gauge>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            work,
            fail,
            gauge,
            starts: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrawlTask for BusyTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<CrawlReport> {
        self.starts.lock().unwrap().push(Instant::now());
        self.gauge.enter();
        tokio::time::sleep(self.work).await;
        self.gauge.leave();

        if self.fail {
            anyhow::bail!("listing page unavailable");
        }
        Ok(CrawlReport::default())
    }
}

async fn run_for(mut scheduler: Scheduler, duration: Duration) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(stop_rx).await });
    tokio::time::sleep(duration).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_bound() {
    for k in 1..=3usize {
        let gauge = Arc::new(Gauge::default());
        let mut scheduler = Scheduler::new(k).unwrap();
        let tasks: Vec<_> = (0..k + 3)
            .map(|i| BusyTask::new(&format!("task-{i}"), Duration::from_secs(3), false, gauge.clone()))
            .collect();
        for task in &tasks {
            scheduler.schedule(task.clone(), IntervalRange::from_secs(1, 2).unwrap());
        }

        run_for(scheduler, Duration::from_secs(60)).await;

        assert_eq!(gauge.peak.load(Ordering::SeqCst), k, "peak for K={k}");
        assert_eq!(gauge.current.load(Ordering::SeqCst), 0, "stop waits for running tasks");
        assert!(tasks.iter().all(|t| !t.starts().is_empty()), "every task ran for K={k}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_task_keeps_same_cadence() {
    let gauge = Arc::new(Gauge::default());
    let mut scheduler = Scheduler::new(2).unwrap();
    let ok = BusyTask::new("ok", Duration::from_millis(100), false, gauge.clone());
    let failing = BusyTask::new("failing", Duration::from_millis(100), true, gauge.clone());
    scheduler.schedule(ok.clone(), IntervalRange::from_secs(10, 20).unwrap());
    scheduler.schedule(failing.clone(), IntervalRange::from_secs(10, 20).unwrap());

    run_for(scheduler, Duration::from_secs(300)).await;

    for task in [&ok, &failing] {
        let starts = task.starts();
        assert!(starts.len() >= 14, "{} ran {} times", task.name, starts.len());
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            // Gap = run time + sampled interval; allow the idle-sleep granularity
            assert!(gap >= Duration::from_secs(10), "{} gap {gap:?}", task.name);
            assert!(gap <= Duration::from_secs(22), "{} gap {gap:?}", task.name);
        }
    }
}
