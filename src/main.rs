//! Meander main entry point
//!
//! This is the command-line interface for running crawl workers, seeding
//! jobs and inspecting the shared store.

use anyhow::Context;
use clap::Parser;
use meander::browser::HttpBrowser;
use meander::config::{load_config_with_hash, Config};
use meander::crawler::{load_seed_file, seed_job, Worker, WorkerSummary};
use meander::output::{load_statistics, print_statistics};
use meander::storage::{SharedStorage, SqliteStorage};
use meander::Pipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Meander: a distributed crawl orchestration engine
///
/// Workers claim tasks of a job from a shared SQLite store, crawl them with
/// a checkpointed state machine and resume from the last checkpoint after a
/// crash.
#[derive(Parser, Debug)]
#[command(name = "meander")]
#[command(version)]
#[command(about = "Distributed crawl orchestration engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Job identifier grouping the tasks to work on
    #[arg(short, long, default_value = "default")]
    job: String,

    /// Crawler id of the first worker
    #[arg(long, default_value_t = 1)]
    crawler_id: u32,

    /// Number of workers to run in this process
    #[arg(short, long, default_value_t = 1)]
    workers: u32,

    /// Seed the job from this list (one `url[,rank[,category]]` per line) and exit
    #[arg(long, value_name = "FILE", conflicts_with = "stats")]
    seed: Option<PathBuf>,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "seed")]
    stats: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(seed_path) = &cli.seed {
        handle_seed(&config, &cli.job, seed_path)?;
    } else if cli.stats {
        handle_stats(&config, &cli.job)?;
    } else {
        handle_crawl(config, config_hash, &cli).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("meander=info,warn"),
            1 => EnvFilter::new("meander=debug,info"),
            2 => EnvFilter::new("meander=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.store.database_path);
    SqliteStorage::open(path, Duration::from_millis(config.store.busy_timeout_ms))
        .with_context(|| format!("failed to open database {}", path.display()))
}

/// Handles the --seed mode: creates the job's tasks from a seed list
fn handle_seed(config: &Config, job: &str, path: &Path) -> anyhow::Result<()> {
    let entries = load_seed_file(path)
        .with_context(|| format!("failed to read seed list {}", path.display()))?;
    let storage = SharedStorage::new(open_storage(config)?);

    let summary = seed_job(&storage, job, &entries, &config.crawler)?;

    println!("Job: {}", job);
    println!("  Tasks created: {}", summary.tasks_created);
    println!("  Tasks already present: {}", summary.tasks_existing);
    println!("  Seeds skipped: {}", summary.skipped);
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config, job: &str) -> anyhow::Result<()> {
    println!("Database: {}\n", config.store.database_path);

    let storage = open_storage(config)?;
    let stats = load_statistics(&storage, Some(job))?;
    print_statistics(&stats);

    Ok(())
}

/// Runs `--workers` workers against the shared store, each on its own connection
async fn handle_crawl(config: Config, config_hash: String, cli: &Cli) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let mut handles = Vec::new();

    for offset in 0..cli.workers.max(1) {
        let crawler_id = cli.crawler_id + offset;
        let storage = SharedStorage::new(open_storage(&config)?);
        let browser = Box::new(HttpBrowser::new(&config.browser));
        let pipeline = Pipeline::from_config(&config, Vec::new());

        let mut worker = Worker::new(
            cli.job.clone(),
            crawler_id,
            Arc::clone(&config),
            storage,
            browser,
            pipeline,
        )
        .with_config_hash(config_hash.clone());

        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    let mut total = WorkerSummary::default();
    let mut failures = 0;

    for handle in handles {
        match handle.await {
            Ok(Ok(summary)) => {
                total.finished += summary.finished;
                total.aborted += summary.aborted;
                total.reopened += summary.reopened;
                total.processed += summary.processed;
            }
            Ok(Err(e)) => {
                tracing::error!("Worker failed: {}", e);
                failures += 1;
            }
            Err(e) => {
                tracing::error!("Worker panicked: {}", e);
                failures += 1;
            }
        }
    }

    tracing::info!(
        job = %cli.job,
        finished = total.finished,
        aborted = total.aborted,
        processed = total.processed,
        "Crawl run complete"
    );

    if failures > 0 {
        anyhow::bail!("{} worker(s) stopped with an error", failures);
    }
    Ok(())
}
