//! Multicast batches: token lists stored under a shareable handle.
//!
//! A batch's token list is only ever rewritten as a whole.
use super::repo::Pool;
use crate::model::BatchHandle;
use anyhow::{Context, Result};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, error, info, instrument};

fn encode_tokens(tokens: &[String]) -> Result<String> {
    serde_json::to_string(tokens).context("failed to encode batch tokens")
}

#[instrument(skip_all)]
pub async fn create_batch(pool: &Pool, tokens: &[String]) -> Result<BatchHandle> {
    let mut tx = pool.begin().await?;
    let handle = create_batch_tx(&mut tx, tokens).await?;
    tx.commit().await?;
    Ok(handle)
}

pub(crate) async fn create_batch_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tokens: &[String],
) -> Result<BatchHandle> {
    let handle = BatchHandle::new();
    sqlx::query("INSERT INTO batches (handle, tokens) VALUES (?, ?)")
        .bind(handle.to_string())
        .bind(encode_tokens(tokens)?)
        .execute(&mut **tx)
        .await?;
    info!(%handle, devices = tokens.len(), "stored multicast batch");
    Ok(handle)
}

/// Tokens of a batch, or `None` if the handle is unknown (already completed).
#[instrument(skip_all)]
pub async fn get_batch(pool: &Pool, handle: &BatchHandle) -> Result<Option<Vec<String>>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT tokens FROM batches WHERE handle = ?")
        .bind(handle.to_string())
        .fetch_optional(pool)
        .await?;
    let Some(raw) = raw else {
        debug!(%handle, "no batch for handle");
        return Ok(None);
    };
    let tokens = serde_json::from_str(&raw)
        .with_context(|| format!("batch {} has malformed token list", handle))?;
    Ok(Some(tokens))
}

/// Overwrite a batch's token list. Returns `false` if the handle is unknown.
#[instrument(skip_all)]
pub async fn replace_batch(pool: &Pool, handle: &BatchHandle, tokens: &[String]) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE batches SET tokens = ?, updated_at = CURRENT_TIMESTAMP WHERE handle = ?",
    )
    .bind(encode_tokens(tokens)?)
    .bind(handle.to_string())
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        error!(%handle, "no batch to update");
        return Ok(false);
    }
    tx.commit().await?;
    debug!(%handle, devices = tokens.len(), "batch narrowed");
    Ok(true)
}

#[instrument(skip_all)]
pub async fn delete_batch(pool: &Pool, handle: &BatchHandle) -> Result<bool> {
    let res = sqlx::query("DELETE FROM batches WHERE handle = ?")
        .bind(handle.to_string())
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn count_batches(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
