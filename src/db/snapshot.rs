use super::repo::Pool;
use crate::model::NotificationItem;
use anyhow::{Context, Result};
use tracing::instrument;

/// The change set stored by the previous detector run, if any.
#[instrument(skip_all)]
pub async fn load_snapshot(pool: &Pool) -> Result<Option<Vec<NotificationItem>>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT items FROM snapshots WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    raw.map(|raw| serde_json::from_str(&raw).context("stored snapshot is malformed"))
        .transpose()
}

#[instrument(skip_all)]
pub async fn save_snapshot(pool: &Pool, items: &[NotificationItem]) -> Result<()> {
    let json = serde_json::to_string(items).context("failed to encode snapshot")?;
    sqlx::query(
        "INSERT INTO snapshots (id, items) VALUES (1, ?) \
         ON CONFLICT(id) DO UPDATE SET items = excluded.items, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(json)
    .execute(pool)
    .await?;
    Ok(())
}
