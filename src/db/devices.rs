//! Device registry: one row per live push token.
use super::model::DeviceRecord;
use super::repo::Pool;
use anyhow::{anyhow, Result};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};

async fn find_device_id_tx(tx: &mut Transaction<'_, Sqlite>, token: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM devices WHERE token = ?")
        .bind(token)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(id)
}

/// Register a token. Returns `false` when it was already registered.
#[instrument(skip_all)]
pub async fn register_device(pool: &Pool, token: &str) -> Result<bool> {
    let token = token.trim();
    if token.is_empty() {
        return Err(anyhow!("device token must be non-empty"));
    }
    info!(token, "registering device");
    let mut tx = pool.begin().await?;
    if find_device_id_tx(&mut tx, token).await?.is_some() {
        debug!(token, "device already registered; ignoring");
        return Ok(false);
    }
    sqlx::query("INSERT INTO devices (token) VALUES (?)")
        .bind(token)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

/// Remove a token. Returns `false` when it was not registered.
#[instrument(skip_all)]
pub async fn unregister_device(pool: &Pool, token: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let removed = unregister_device_tx(&mut tx, token).await?;
    tx.commit().await?;
    Ok(removed)
}

pub(crate) async fn unregister_device_tx(
    tx: &mut Transaction<'_, Sqlite>,
    token: &str,
) -> Result<bool> {
    let token = token.trim();
    info!(token, "unregistering device");
    let Some(id) = find_device_id_tx(tx, token).await? else {
        warn!(token, "device already unregistered");
        return Ok(false);
    };
    sqlx::query("DELETE FROM devices WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(true)
}

/// Replace `old_token` by `new_token`, keeping the record's storage key.
///
/// If `new_token` is already registered the two records collapse into the
/// existing one and the old record is removed. Returns `false` when
/// `old_token` is unknown.
#[instrument(skip_all)]
pub async fn rotate_device(pool: &Pool, old_token: &str, new_token: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let rotated = rotate_device_tx(&mut tx, old_token, new_token).await?;
    tx.commit().await?;
    Ok(rotated)
}

pub(crate) async fn rotate_device_tx(
    tx: &mut Transaction<'_, Sqlite>,
    old_token: &str,
    new_token: &str,
) -> Result<bool> {
    let old_token = old_token.trim();
    let new_token = new_token.trim();
    if new_token.is_empty() {
        return Err(anyhow!("replacement token must be non-empty"));
    }
    info!(old_token, new_token, "updating device token");
    let Some(id) = find_device_id_tx(tx, old_token).await? else {
        warn!(old_token, "no device for registration token");
        return Ok(false);
    };
    if old_token == new_token {
        return Ok(true);
    }
    match find_device_id_tx(tx, new_token).await? {
        Some(existing) => {
            debug!(old_token, existing, "replacement token already registered; dropping old record");
            sqlx::query("DELETE FROM devices WHERE id = ?")
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }
        None => {
            sqlx::query(
                "UPDATE devices SET token = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(new_token)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(true)
}

#[instrument(skip_all)]
pub async fn find_device(pool: &Pool, token: &str) -> Result<Option<DeviceRecord>> {
    let row = sqlx::query(
        "SELECT id, token, created_at, updated_at FROM devices WHERE token = ?",
    )
    .bind(token.trim())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| DeviceRecord {
        id: row.get("id"),
        token: row.get("token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

/// All registered tokens, in registration order.
#[instrument(skip_all)]
pub async fn list_devices(pool: &Pool) -> Result<Vec<String>> {
    let tokens = sqlx::query_scalar::<_, String>("SELECT token FROM devices ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    Ok(tokens)
}

#[instrument(skip_all)]
pub async fn count_devices(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
        .fetch_one(pool)
        .await?;
    debug!(count, "total number of devices");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_pool;

    #[tokio::test]
    async fn register_is_idempotent() {
        let pool = test_pool().await;
        assert!(register_device(&pool, "tok-a").await.unwrap());
        assert!(!register_device(&pool, "tok-a").await.unwrap());
        assert_eq!(count_devices(&pool).await.unwrap(), 1);
        assert_eq!(list_devices(&pool).await.unwrap(), vec!["tok-a"]);
    }

    #[tokio::test]
    async fn register_rejects_blank_token() {
        let pool = test_pool().await;
        assert!(register_device(&pool, "  ").await.is_err());
        assert_eq!(count_devices(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let pool = test_pool().await;
        register_device(&pool, "tok-a").await.unwrap();
        assert!(unregister_device(&pool, "tok-a").await.unwrap());
        assert!(!unregister_device(&pool, "tok-a").await.unwrap());
        assert_eq!(count_devices(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rotate_keeps_storage_key() {
        let pool = test_pool().await;
        register_device(&pool, "old").await.unwrap();
        let before = find_device(&pool, "old").await.unwrap().unwrap();

        assert!(rotate_device(&pool, "old", "new").await.unwrap());

        assert!(find_device(&pool, "old").await.unwrap().is_none());
        let after = find_device(&pool, "new").await.unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(count_devices(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rotate_unknown_token_is_noop() {
        let pool = test_pool().await;
        register_device(&pool, "a").await.unwrap();
        assert!(!rotate_device(&pool, "ghost", "b").await.unwrap());
        assert_eq!(count_devices(&pool).await.unwrap(), 1);
        assert!(find_device(&pool, "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotate_onto_registered_token_collapses_records() {
        let pool = test_pool().await;
        register_device(&pool, "a").await.unwrap();
        register_device(&pool, "b").await.unwrap();
        assert!(rotate_device(&pool, "a", "b").await.unwrap());
        assert_eq!(list_devices(&pool).await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn tokens_are_trimmed_consistently() {
        let pool = test_pool().await;
        assert!(register_device(&pool, " a ").await.unwrap());
        assert!(find_device(&pool, "a ").await.unwrap().is_some());
        assert!(rotate_device(&pool, " a", "b ").await.unwrap());
        assert_eq!(list_devices(&pool).await.unwrap(), vec!["b"]);
        assert!(unregister_device(&pool, " b ").await.unwrap());
        assert_eq!(count_devices(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_preserves_registration_order() {
        let pool = test_pool().await;
        for token in ["c", "a", "b"] {
            register_device(&pool, token).await.unwrap();
        }
        assert_eq!(list_devices(&pool).await.unwrap(), vec!["c", "a", "b"]);
    }
}
