mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobscout::config::Config;

#[derive(Parser)]
#[command(
    name = "jobscout",
    version,
    about = "Job posting crawler with LLM qualification and fan-out delivery",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the crawl scheduler over the configured sources
    Crawl {
        /// Only crawl these sources (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Run each source once and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Consume the intake queue and run the processing pipeline
    Consume,

    /// Serve the intake gateway (dedup store API)
    Gateway,

    /// Review persisted postings
    Review {
        #[command(subcommand)]
        action: ReviewCommand,
    },

    /// Validate the configuration and print it
    CheckConfig,
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// Show unreviewed postings, newest first
    List {
        /// Maximum number of postings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Count unreviewed postings
    Count,

    /// Mark postings reviewed
    Mark {
        /// Posting ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

impl From<ReviewCommand> for commands::ReviewAction {
    fn from(command: ReviewCommand) -> Self {
        match command {
            ReviewCommand::List { limit } => Self::List { limit },
            ReviewCommand::Count => Self::Count,
            ReviewCommand::Mark { ids } => Self::Mark { ids },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    if let Err(e) = jobscout::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics registration failed");
    }

    tracing::info!("jobscout starting");

    match cli.command {
        Commands::Crawl { sources, once } => {
            tracing::info!(sources = ?sources, once, "Starting crawl command");
            commands::crawl(config, sources, once).await?;
        }

        Commands::Consume => {
            tracing::info!(queue = %config.transport.queue, "Starting consume command");
            commands::consume(config).await?;
        }

        Commands::Gateway => {
            tracing::info!(bind = %config.gateway.bind_address, "Starting gateway command");
            commands::gateway(config).await?;
        }

        Commands::Review { action } => {
            commands::review(config, action.into()).await?;
        }

        Commands::CheckConfig => {
            println!("Configuration OK");
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    tracing::info!("jobscout completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("jobscout=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("jobscout={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
