//! Delivery dispatcher: sends one task's message and turns per-recipient
//! outcomes into registry and batch mutations.
use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{BatchHandle, DeliveryOutcome, NotificationPayload, TaskParams, TaskVerdict};
use crate::payload::build_message;
use crate::push::PushService;

/// Registry changes and leftovers derived from one multicast report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Classification {
    pub delivered: usize,
    /// `(old, new)` token pairs.
    pub rotations: Vec<(String, String)>,
    pub invalid: Vec<String>,
    pub rejected: Vec<(String, String)>,
    pub retriable: Vec<String>,
}

/// Pair each token with the outcome at the same index.
pub fn classify(tokens: &[String], outcomes: &[DeliveryOutcome]) -> Classification {
    let mut out = Classification::default();
    for (token, outcome) in tokens.iter().zip(outcomes) {
        match outcome {
            DeliveryOutcome::Delivered => out.delivered += 1,
            DeliveryOutcome::DeliveredWithRotation(new) => {
                out.delivered += 1;
                out.rotations.push((token.clone(), new.clone()));
            }
            DeliveryOutcome::PermanentlyInvalid => out.invalid.push(token.clone()),
            DeliveryOutcome::TransientFailure => out.retriable.push(token.clone()),
            DeliveryOutcome::Rejected(code) => out.rejected.push((token.clone(), code.clone())),
        }
    }
    out
}

pub async fn dispatch(pool: &Pool, push: &dyn PushService, params: &TaskParams) -> Result<TaskVerdict> {
    match params {
        TaskParams::Single { device, payload } => send_single(pool, push, device, payload).await,
        TaskParams::Multicast { batch, payload } => {
            send_multicast(pool, push, batch, payload).await
        }
    }
}

#[instrument(skip_all, fields(device = %token))]
pub async fn send_single(
    pool: &Pool,
    push: &dyn PushService,
    token: &str,
    payload: &NotificationPayload,
) -> Result<TaskVerdict> {
    info!(items = payload.count(), "sending message to device");
    let message = build_message(payload);
    let outcome = match push.send_single(&message, token).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(%err, "push call failed; will retry");
            return Ok(TaskVerdict::Retry);
        }
    };

    match outcome {
        DeliveryOutcome::Delivered => {
            info!("successfully sent message to device");
        }
        DeliveryOutcome::DeliveredWithRotation(new_token) => {
            info!(new_token = %new_token, "delivered; device has a new token");
            db::rotate_device(pool, token, &new_token).await?;
        }
        DeliveryOutcome::PermanentlyInvalid => {
            db::unregister_device(pool, token).await?;
        }
        DeliveryOutcome::TransientFailure => {
            warn!("device temporarily unreachable; will retry");
            return Ok(TaskVerdict::Retry);
        }
        DeliveryOutcome::Rejected(code) => {
            error!(code = %code, "error sending message to device");
        }
    }
    Ok(TaskVerdict::Done)
}

#[instrument(skip_all, fields(batch = %handle))]
pub async fn send_multicast(
    pool: &Pool,
    push: &dyn PushService,
    handle: &BatchHandle,
    payload: &NotificationPayload,
) -> Result<TaskVerdict> {
    let Some(tokens) = db::get_batch(pool, handle).await? else {
        info!("batch already completed; nothing to send");
        return Ok(TaskVerdict::Done);
    };
    if tokens.is_empty() {
        db::delete_batch(pool, handle).await?;
        return Ok(TaskVerdict::Done);
    }

    let message = build_message(payload);
    let outcomes = match push.send_multicast(&message, &tokens).await {
        Ok(outcomes) if outcomes.len() == tokens.len() => outcomes,
        Ok(outcomes) => {
            warn!(
                expected = tokens.len(),
                got = outcomes.len(),
                "report does not line up with recipients; will retry batch"
            );
            return Ok(TaskVerdict::Retry);
        }
        Err(err) => {
            warn!(%err, devices = tokens.len(), "multicast call failed; will retry batch");
            return Ok(TaskVerdict::Retry);
        }
    };

    let report = classify(&tokens, &outcomes);
    for (token, code) in &report.rejected {
        warn!(token = %token, code = %code, "provider rejected message for device");
    }
    let failures = report.invalid.len() + report.rejected.len() + report.retriable.len();
    info!(
        delivered = report.delivered,
        rotated = report.rotations.len(),
        failures,
        "multicast report received"
    );

    // Batch is settled before the registry: a retry only sees unresolved tokens.
    let verdict = if report.retriable.is_empty() {
        db::delete_batch(pool, handle).await?;
        TaskVerdict::Done
    } else {
        warn!(retriable = report.retriable.len(), "narrowing batch for retry");
        db::replace_batch(pool, handle, &report.retriable).await?;
        TaskVerdict::Retry
    };

    apply_registry_changes(pool, &report).await?;
    Ok(verdict)
}

/// Rotations and removals from one report, committed together or not at all.
async fn apply_registry_changes(pool: &Pool, report: &Classification) -> Result<()> {
    if report.rotations.is_empty() && report.invalid.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for (old, new) in &report.rotations {
        db::devices::rotate_device_tx(&mut tx, old, new).await?;
    }
    for token in &report.invalid {
        warn!(token = %token, "device not registered with provider");
        db::devices::unregister_device_tx(&mut tx, token).await?;
    }
    tx.commit().await?;
    Ok(())
}
