//! Prometheus metrics for the crawl scheduler, the pipeline and the gateway
//!
//! This module provides metrics tracking for:
//! - Scheduler: task runs, failures, run duration, tasks in flight
//! - Crawling: listings discovered, skipped, blocked, submitted
//! - Pipeline: stage outcomes, intake evictions, dead letters, queue depth
//! - Gateway: API requests by endpoint and status
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for scheduler and crawl metrics
struct CrawlMetrics {
    task_runs: CounterVec,
    task_failures: CounterVec,
    run_duration: HistogramVec,
    tasks_in_flight: Gauge,
    listings: CounterVec,
}

/// Container for pipeline and gateway metrics
struct PipelineMetrics {
    stage_outcomes: CounterVec,
    intake_evictions: CounterVec,
    dead_letters: CounterVec,
    queue_depth: GaugeVec,
    api_requests: CounterVec,
}

/// Global storage for crawl metrics
static CRAWL_METRICS: OnceLock<CrawlMetrics> = OnceLock::new();

/// Global storage for pipeline metrics
static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Called once at application startup. If registration fails the error is
/// returned and every recording function below stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = jobscout::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics initialization failed");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let crawl = CrawlMetrics {
        task_runs: register_counter_vec!(
            "jobscout_scheduler_task_runs_total",
            "Total crawl task runs by task",
            &["task"]
        )?,
        task_failures: register_counter_vec!(
            "jobscout_scheduler_task_failures_total",
            "Total failed or panicked crawl task runs by task",
            &["task", "kind"]
        )?,
        run_duration: register_histogram_vec!(
            "jobscout_scheduler_run_duration_seconds",
            "Crawl task run duration in seconds",
            &["task"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        tasks_in_flight: register_gauge!(
            "jobscout_scheduler_tasks_in_flight",
            "Crawl tasks currently running"
        )?,
        listings: register_counter_vec!(
            "jobscout_crawler_listings_total",
            "Listings handled per source and outcome",
            &["source", "outcome"]
        )?,
    };

    let pipeline = PipelineMetrics {
        stage_outcomes: register_counter_vec!(
            "jobscout_pipeline_stage_outcomes_total",
            "Items handled per pipeline stage and outcome",
            &["stage", "outcome"]
        )?,
        intake_evictions: register_counter_vec!(
            "jobscout_pipeline_evictions_total",
            "Items evicted from drop-oldest queues",
            &["queue"]
        )?,
        dead_letters: register_counter_vec!(
            "jobscout_pipeline_dead_letters_total",
            "Inbound messages routed to the dead-letter list",
            &["queue"]
        )?,
        queue_depth: register_gauge_vec!(
            "jobscout_pipeline_queue_depth",
            "Items waiting in each stage queue",
            &["queue"]
        )?,
        api_requests: register_counter_vec!(
            "jobscout_gateway_requests_total",
            "Gateway API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
    };

    CRAWL_METRICS
        .set(crawl)
        .map_err(|_| "Crawl metrics already initialized")?;
    PIPELINE_METRICS
        .set(pipeline)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    CRAWL_METRICS.get().is_some() && PIPELINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a task run: bumps the run counter and the in-flight gauge
pub fn start_task_run(task: &str) -> MetricsTimer {
    match CRAWL_METRICS.get() {
        Some(m) => {
            m.task_runs.with_label_values(&[task]).inc();
            m.tasks_in_flight.inc();
            MetricsTimer::new(m.run_duration.with_label_values(&[task]).start_timer())
        }
        None => MetricsTimer::noop(),
    }
}

/// Finish a task run; `failure` is `Some("error")` or `Some("panic")` on failure
pub fn finish_task_run(task: &str, failure: Option<&str>) {
    let Some(m) = CRAWL_METRICS.get() else {
        return;
    };

    m.tasks_in_flight.dec();
    if let Some(kind) = failure {
        m.task_failures.with_label_values(&[task, kind]).inc();
    }
}

/// Record per-run listing counts for a source
pub fn record_listings(
    source: &str,
    discovered: u64,
    skipped_seen: u64,
    blocked: u64,
    submitted: u64,
    failed: u64,
) {
    let Some(m) = CRAWL_METRICS.get() else {
        return;
    };

    for (outcome, count) in [
        ("discovered", discovered),
        ("skipped_seen", skipped_seen),
        ("blocked", blocked),
        ("submitted", submitted),
        ("failed", failed),
    ] {
        if count > 0 {
            m.listings
                .with_label_values(&[source, outcome])
                .inc_by(count as f64);
        }
    }
}

/// Record one item's outcome in a pipeline stage
pub fn record_stage_outcome(stage: &str, outcome: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.stage_outcomes.with_label_values(&[stage, outcome]).inc();
    }
}

/// Record an eviction from a drop-oldest queue
pub fn record_eviction(queue: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.intake_evictions.with_label_values(&[queue]).inc();
    }
}

/// Record a dead-lettered inbound message
pub fn record_dead_letter(queue: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.dead_letters.with_label_values(&[queue]).inc();
    }
}

/// Update the depth gauge of a stage queue
pub fn set_queue_depth(queue: &str, depth: usize) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }
}

/// Record a gateway API request
pub fn record_api_request(endpoint: &str, status: u16) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
}

// ============================================================================
// Tests
// ============================================================================
