use super::model::QueuedTask;
use crate::model::TaskParams;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form; sqlx only creates missing files with mode=rwc.
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn enqueue_task(
    pool: &Pool,
    queue: &str,
    params: &TaskParams,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = enqueue_task_tx(&mut tx, queue, params, due_at).await?;
    tx.commit().await?;
    Ok(id)
}

pub(crate) async fn enqueue_task_tx(
    tx: &mut Transaction<'_, Sqlite>,
    queue: &str,
    params: &TaskParams,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let json = serde_json::to_string(params).context("failed to encode task params")?;
    let rec = sqlx::query(
        "INSERT INTO outbox (queue, params, attempt, due_at) VALUES (?, ?, 0, ?) RETURNING id",
    )
    .bind(queue)
    .bind(json)
    .bind(due_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_task(pool: &Pool, queue: &str) -> Result<Option<QueuedTask>> {
    let row = sqlx::query(
        "SELECT id, queue, params, attempt FROM outbox \
         WHERE queue = ? AND datetime(due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .bind(queue)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| QueuedTask {
        id: row.get("id"),
        queue: row.get("queue"),
        params: row.get("params"),
        attempt: row.get::<i64, _>("attempt").max(0) as u32,
    }))
}

#[instrument(skip_all)]
pub async fn delete_task(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff delay for the given attempt: 5s * 2^attempt, capped.
/// A cap of zero or less leaves the delay uncapped.
pub fn backoff_secs(attempt: u32, max_cap_secs: i64) -> i64 {
    let secs = 5_i64 * (1_i64 << attempt.min(10));
    if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    }
}

#[instrument(skip_all)]
pub async fn backoff_task_with_cap(
    pool: &Pool,
    id: i64,
    attempt: u32,
    max_cap_secs: i64,
) -> Result<()> {
    let secs = backoff_secs(attempt, max_cap_secs);
    sqlx::query(
        "UPDATE outbox SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(i64::from(attempt) + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_remaining_tasks(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
