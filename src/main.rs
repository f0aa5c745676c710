use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use change_notifier::config;
use change_notifier::db;
use change_notifier::fanout;
use change_notifier::model::NotificationItem;
use change_notifier::outbox::{self, RetryPolicy};
use change_notifier::push::GcmClient;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process delivery tasks until interrupted
    Worker,
    /// Register a device token
    Register { token: String },
    /// Unregister a device token
    Unregister { token: String },
    /// List registered device tokens
    Devices,
    /// Compare a change set file with the stored snapshot and notify devices of new items
    Notify {
        /// YAML list of `{title, url, icon}` entries
        #[arg(long)]
        changes: PathBuf,
    },
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

    match args.command {
        Command::Worker => {
            let push = GcmClient::from_config(&cfg)?;
            let policy = RetryPolicy::from_config(&cfg);
            let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
            let (shutdown_tx, shutdown) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("ctrl-c received; finishing current task");
                        let _ = shutdown_tx.send(true);
                    }
                    Err(err) => {
                        error!(%err, "unable to listen for ctrl-c");
                        std::future::pending::<()>().await;
                    }
                }
            });
            outbox::run_worker(&pool, &push, &policy, poll_sleep, shutdown).await;
        }
        Command::Register { token } => {
            if db::register_device(&pool, &token).await? {
                println!("registered {}", token);
            } else {
                println!("{} is already registered", token);
            }
        }
        Command::Unregister { token } => {
            if db::unregister_device(&pool, &token).await? {
                println!("unregistered {}", token);
            } else {
                println!("{} was not registered", token);
            }
        }
        Command::Devices => {
            for token in db::list_devices(&pool).await? {
                println!("{}", token);
            }
            println!("total: {}", db::count_devices(&pool).await?);
        }
        Command::Notify { changes } => {
            let content = tokio::fs::read_to_string(&changes)
                .await
                .with_context(|| format!("failed to read {}", changes.display()))?;
            let items: Vec<NotificationItem> =
                serde_yaml::from_str(&content).context("invalid change set YAML")?;
            let report = fanout::notify_changes(&pool, &cfg.queue.name, &items).await?;
            println!("{}", report);
        }
    }

    Ok(())
}
