#![allow(dead_code)]

use change_notifier::model::DeliveryOutcome;
use change_notifier::outbox::RetryPolicy;
use change_notifier::payload::PushMessage;
use change_notifier::push::{PushService, TransportError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const QUEUE: &str = "gcm";

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn policy() -> RetryPolicy {
    RetryPolicy {
        queue_name: QUEUE.to_string(),
        max_retry: 3,
        max_backoff_secs: 60,
    }
}

/// Make every queued task due now.
pub async fn make_all_due(pool: &sqlx::SqlitePool) {
    sqlx::query("UPDATE outbox SET due_at = datetime('now', '-1 seconds')")
        .execute(pool)
        .await
        .unwrap();
}

pub async fn attempts(pool: &sqlx::SqlitePool) -> Vec<i64> {
    sqlx::query_scalar("SELECT attempt FROM outbox ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[derive(Debug, Clone)]
pub struct Call {
    pub tokens: Vec<String>,
    pub message: PushMessage,
}

/// Fake provider: pops scripted responses, defaulting to "all delivered".
#[derive(Clone, Default)]
pub struct RecordingPush {
    single: Arc<Mutex<VecDeque<Result<DeliveryOutcome, TransportError>>>>,
    multicast: Arc<Mutex<VecDeque<Result<Vec<DeliveryOutcome>, TransportError>>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingPush {
    pub fn with_single(responses: Vec<Result<DeliveryOutcome, TransportError>>) -> Self {
        Self {
            single: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn with_multicast(responses: Vec<Result<Vec<DeliveryOutcome>, TransportError>>) -> Self {
        Self {
            multicast: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl PushService for RecordingPush {
    async fn send_single(
        &self,
        message: &PushMessage,
        token: &str,
    ) -> Result<DeliveryOutcome, TransportError> {
        self.calls.lock().await.push(Call {
            tokens: vec![token.to_string()],
            message: message.clone(),
        });
        self.single
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(DeliveryOutcome::Delivered))
    }

    async fn send_multicast(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<Vec<DeliveryOutcome>, TransportError> {
        self.calls.lock().await.push(Call {
            tokens: tokens.to_vec(),
            message: message.clone(),
        });
        self.multicast
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(vec![DeliveryOutcome::Delivered; tokens.len()]))
    }
}
