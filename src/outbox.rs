//! Delivery task execution: provenance and retry-ceiling checks in front of
//! the dispatcher, plus the worker step that drives the local queue.
use anyhow::Result;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::dispatch;
use crate::model::{TaskParams, TaskVerdict};
use crate::push::PushService;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("untrusted invocation: not issued by queue '{expected}'")]
    Untrusted { expected: String },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub queue_name: String,
    pub max_retry: u32,
    pub max_backoff_secs: i64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            queue_name: cfg.queue.name.clone(),
            max_retry: cfg.queue.max_retry,
            max_backoff_secs: i64::try_from(cfg.app.max_backoff_seconds).unwrap_or(i64::MAX),
        }
    }
}

/// One execution of a delivery task as handed over by the queue.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Identity of the queue that issued the task; absent for foreign callers.
    pub queue_name: Option<String>,
    /// Number of earlier executions, if the queue reports it.
    pub retry_count: Option<u32>,
    pub params: TaskParams,
}

#[instrument(skip_all, fields(kind = invocation.params.kind()))]
pub async fn handle_invocation(
    pool: &Pool,
    push: &dyn PushService,
    policy: &RetryPolicy,
    invocation: &Invocation,
) -> Result<TaskVerdict, DeliveryError> {
    match invocation.queue_name.as_deref() {
        Some(name) if name == policy.queue_name => {}
        _ => {
            return Err(DeliveryError::Untrusted {
                expected: policy.queue_name.clone(),
            })
        }
    }

    if let Some(retry_count) = invocation.retry_count {
        if retry_count > policy.max_retry {
            error!(retry_count, max_retry = policy.max_retry, "too many retries, dropping task");
            if let TaskParams::Multicast { batch, .. } = &invocation.params {
                db::delete_batch(pool, batch).await?;
            }
            return Ok(TaskVerdict::Done);
        }
    }

    Ok(dispatch::dispatch(pool, push, &invocation.params).await?)
}

/// How one task execution ended for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Retry,
    Failed,
}

/// Tally of a queue drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl DrainSummary {
    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.failed
    }

    pub fn no_retries_needed(&self) -> bool {
        self.retried == 0 && self.failed == 0
    }

    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Done => self.completed += 1,
            TaskOutcome::Retry => self.retried += 1,
            TaskOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_retries_needed() {
            write!(f, "{} tasks completed; no retries needed", self.completed)
        } else {
            write!(
                f,
                "{} tasks completed, {} scheduled for retry, {} failed",
                self.completed, self.retried, self.failed
            )
        }
    }
}

/// Run the next due task of the policy's queue. Returns `false` when nothing was due.
pub async fn process_next_task(
    pool: &Pool,
    push: &dyn PushService,
    policy: &RetryPolicy,
) -> Result<bool> {
    Ok(run_next_task(pool, push, policy).await?.is_some())
}

/// Run due tasks until none are left or `max_tasks` have run.
pub async fn drain_due_tasks(
    pool: &Pool,
    push: &dyn PushService,
    policy: &RetryPolicy,
    max_tasks: usize,
) -> Result<DrainSummary> {
    let mut summary = DrainSummary::default();
    while summary.processed() < max_tasks {
        let Some(outcome) = run_next_task(pool, push, policy).await? else {
            break;
        };
        summary.record(outcome);
    }
    info!(%summary, "queue drain finished");
    Ok(summary)
}

/// Poll the queue until `shutdown` turns true. Shutdown is only observed
/// between tasks, never while one is in flight.
pub async fn run_worker(
    pool: &Pool,
    push: &dyn PushService,
    policy: &RetryPolicy,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(queue = %policy.queue_name, "starting delivery worker");
    while !*shutdown.borrow() {
        let pause = match process_next_task(pool, push, policy).await {
            Ok(true) => continue,
            Ok(false) => poll_interval,
            Err(err) => {
                error!(?err, "delivery worker error");
                Duration::from_secs(1)
            }
        };
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }
    info!("delivery worker stopped");
}

#[instrument(skip_all)]
async fn run_next_task(
    pool: &Pool,
    push: &dyn PushService,
    policy: &RetryPolicy,
) -> Result<Option<TaskOutcome>> {
    let Some(task) = db::next_due_task(pool, &policy.queue_name).await? else {
        return Ok(None);
    };
    let id = task.id;
    let attempt = task.attempt;

    let params: TaskParams = match serde_json::from_str(&task.params) {
        Ok(params) => params,
        Err(err) => {
            error!(%err, id, "malformed task params; dropping task");
            db::delete_task(pool, id).await?;
            return Ok(Some(TaskOutcome::Done));
        }
    };
    let kind = params.kind();
    let invocation = Invocation {
        queue_name: Some(task.queue),
        retry_count: Some(attempt),
        params,
    };

    let outcome = match handle_invocation(pool, push, policy, &invocation).await {
        Ok(TaskVerdict::Done) => {
            db::delete_task(pool, id).await?;
            info!(id, kind, attempt, "delivery task done");
            TaskOutcome::Done
        }
        Ok(TaskVerdict::Retry) => {
            warn!(id, kind, attempt, "delivery task needs retry; backoff");
            db::backoff_task_with_cap(pool, id, attempt, policy.max_backoff_secs).await?;
            TaskOutcome::Retry
        }
        Err(err) => {
            warn!(%err, id, kind, attempt, "delivery task failed; backoff");
            db::backoff_task_with_cap(pool, id, attempt, policy.max_backoff_secs).await?;
            TaskOutcome::Failed
        }
    };
    Ok(Some(outcome))
}
