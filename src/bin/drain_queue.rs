use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use change_notifier::config;
use change_notifier::db;
use change_notifier::outbox::{self, RetryPolicy};
use change_notifier::push::GcmClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run every due delivery task once and exit when none are due"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Stop after this many task executions
    #[arg(long, default_value = "10000")]
    max_tasks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let push = GcmClient::from_config(&cfg)?;
    let policy = RetryPolicy::from_config(&cfg);

    let remaining = db::count_remaining_tasks(&pool).await?;
    info!(remaining_tasks = remaining, "starting queue drain");
    if remaining == 0 {
        info!("no delivery tasks queued, exiting");
        return Ok(());
    }

    let summary = outbox::drain_due_tasks(&pool, &push, &policy, args.max_tasks).await?;

    let remaining = db::count_remaining_tasks(&pool).await?;
    if remaining > 0 {
        warn!(
            %summary,
            remaining_tasks = remaining,
            "tasks left in backoff; run again later"
        );
    } else {
        info!(%summary, "queue drained");
    }
    println!("{}", summary);
    Ok(())
}
