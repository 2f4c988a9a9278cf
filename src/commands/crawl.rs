use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use jobscout::config::{Config, SourceConfig};
use jobscout::crawler::selector::SelectorExtractor;
use jobscout::crawler::SourceCrawl;
use jobscout::scheduler::{CrawlTask, IntervalRange, Scheduler};
use jobscout::storage::{DedupStore, HttpDedupStore};

use super::shutdown_signal;

/// Run the crawl scheduler over the configured sources
///
/// With `once`, every selected source runs a single time and the command
/// exits after printing each report.
pub async fn crawl(config: Config, only: Vec<String>, once: bool) -> Result<()> {
    let sources: Vec<&SourceConfig> = config
        .sources
        .iter()
        .filter(|s| only.is_empty() || only.iter().any(|name| name == &s.name))
        .collect();

    if sources.is_empty() {
        anyhow::bail!("No crawl sources selected; add [[sources]] to the configuration");
    }
    if let Some(missing) = only
        .iter()
        .find(|name| !config.sources.iter().any(|s| &s.name == *name))
    {
        anyhow::bail!("Unknown source '{missing}'");
    }

    let store: Arc<dyn DedupStore> = Arc::new(
        HttpDedupStore::new(
            &config.dedup.base_url,
            Duration::from_secs(config.dedup.timeout_secs),
        )
        .context("Failed to create dedup store client")?,
    );

    let mut tasks = Vec::with_capacity(sources.len());
    for source in sources {
        let extractor = SelectorExtractor::from_config(source)
            .with_context(|| format!("Invalid selectors for source '{}'", source.name))?;
        let task: Arc<dyn CrawlTask> = Arc::new(SourceCrawl::from_config(
            source,
            Arc::new(extractor),
            Arc::clone(&store),
        ));
        let interval = IntervalRange::from_secs(source.interval_min_secs, source.interval_max_secs)?;
        tasks.push((task, interval));
    }

    if once {
        return crawl_once(tasks).await;
    }

    let mut scheduler = Scheduler::new(config.scheduler.max_concurrent_tasks)?;
    for (task, interval) in tasks {
        println!(
            "  {:<20} every {}-{}s",
            task.name(),
            interval.min().as_secs(),
            interval.max().as_secs()
        );
        scheduler.schedule(task, interval);
    }

    println!(
        "Crawl scheduler running with {} sources (max {} concurrent). Press Ctrl+C to stop.",
        scheduler.pending(),
        scheduler.max_concurrent()
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    scheduler.run(stop_rx).await?;
    println!("Crawl scheduler stopped.");
    Ok(())
}

async fn crawl_once(tasks: Vec<(Arc<dyn CrawlTask>, IntervalRange)>) -> Result<()> {
    let mut failures = 0;
    for (task, _) in tasks {
        match task.run().await {
            Ok(report) => println!("{:<20} {report}", task.name()),
            Err(e) => {
                failures += 1;
                println!("{:<20} failed: {e:#}", task.name());
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} source(s) failed");
    }
    Ok(())
}
