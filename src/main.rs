mod cli;
mod config;
mod poller;
mod readwise;
mod retry;
mod shutdown;
mod store;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, PollArgs};
use crate::config::{expand_tilde, Config};
use crate::poller::{PollOutcome, Poller, PollerConfig};
use crate::readwise::{ClientOptions, ReadwiseClient};
use crate::store::{SqliteStore, Store, SyncRun};
use crate::sync::{RunSummary, SyncEngine};

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli);
    init_logging(&config.log_level);

    match cli.command {
        Command::Sync { force } => run_sync(&config, force).await,
        Command::Incremental { hours } => run_incremental(&config, hours).await,
        Command::Poll(args) => run_poll(&config, args).await,
        Command::Status => run_status(&config).await,
        Command::History { limit } => run_history(&config, limit).await,
        Command::ResetDb { yes } => run_reset_db(&config, yes),
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))?;
    Ok(Arc::new(store))
}

fn build_engine(config: &Config) -> anyhow::Result<Arc<SyncEngine>> {
    let client = ReadwiseClient::new(ClientOptions {
        api_token: config.api_token.clone(),
        base_url: config.base_url.clone(),
        ..ClientOptions::default()
    })?;
    let store = open_store(config)?;
    Ok(Arc::new(SyncEngine::new(Arc::new(client), store)))
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Run {} ({}): {} books, {} highlights, {} tags",
        summary.run_id,
        summary.kind.as_str(),
        summary.books_synced,
        summary.highlights_synced,
        summary.tags_synced,
    );
    if !summary.errors.is_empty() {
        println!("{} item(s) failed:", summary.errors.len());
        for err in &summary.errors {
            println!("  - {err}");
        }
    }
}

async fn run_sync(config: &Config, force: bool) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let summary = engine.sync_all(force).await?;
    print_summary(&summary);
    Ok(())
}

async fn run_incremental(config: &Config, hours: u32) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let result = engine.sync_incremental(hours).await?;
    print_summary(&result.summary);
    for highlight in &result.highlights {
        println!("  + {}", first_line(&highlight.text));
    }
    Ok(())
}

async fn run_poll(config: &Config, args: PollArgs) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let poller_config = PollerConfig {
        interval: Duration::from_secs(args.interval),
        max_retries: args.max_retries,
        lookback_hours: args.lookback,
        state_file: if args.no_state {
            None
        } else {
            Some(expand_tilde(&args.state_file))
        },
        ..PollerConfig::default()
    };

    let mut poller = Poller::new(engine, poller_config).with_callback(Box::new(|highlights, _| {
        for highlight in highlights {
            println!("  + {}", first_line(&highlight.text));
        }
    }));

    if args.once {
        match poller.poll_once().await {
            PollOutcome::Completed {
                highlights_count,
                execution_time,
                ..
            } => {
                println!(
                    "Poll completed: {highlights_count} new highlight(s) in {:.1}s",
                    execution_time.as_secs_f64()
                );
                Ok(())
            }
            PollOutcome::RateLimited { retry_after } => {
                anyhow::bail!("rate limited; retry after {retry_after}s")
            }
            PollOutcome::Failed { message } => anyhow::bail!("poll failed: {message}"),
        }
    } else {
        let shutdown = shutdown::install_signal_handler();
        poller.start();
        shutdown.cancelled().await;
        poller.stop().await;
        let state = poller.state();
        info!(
            total_polls = state.total_polls,
            total_highlights = state.total_highlights_found,
            "Poller shut down"
        );
        Ok(())
    }
}

async fn run_status(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stats = store.stats().await?;
    println!("Database: {}", config.database.display());
    println!("  books:      {}", stats.books);
    println!("  highlights: {}", stats.highlights);
    println!("  tags:       {}", stats.tags);
    match &stats.last_completed_run {
        Some(run) => {
            println!("Last completed run:");
            print_run(run);
        }
        None => println!("No completed sync runs yet."),
    }
    Ok(())
}

async fn run_history(config: &Config, limit: u32) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let runs = store.sync_history(limit).await?;
    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

fn print_run(run: &SyncRun) {
    let completed = run
        .completed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "#{} {} {} started {} completed {} ({} books, {} highlights, {} tags, {} error(s))",
        run.id,
        run.kind.as_str(),
        run.status.as_str(),
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        completed,
        run.books_synced,
        run.highlights_synced,
        run.tags_synced,
        run.errors.len(),
    );
}

fn run_reset_db(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!(
            "this deletes {}; re-run with --yes to confirm",
            config.database.display()
        );
    }
    let mut removed = false;
    for suffix in ["", "-wal", "-shm"] {
        let mut path = config.database.as_os_str().to_owned();
        path.push(suffix);
        let path = std::path::PathBuf::from(path);
        match std::fs::remove_file(&path) {
            Ok(()) => removed = true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("removing {}", path.display()));
            }
        }
    }
    if removed {
        println!("Removed {}", config.database.display());
    } else {
        println!("Nothing to remove at {}", config.database.display());
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
