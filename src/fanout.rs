//! Round initiation: turn the registered device list into queued delivery tasks.
use anyhow::Result;
use chrono::Utc;
use std::fmt;
use tracing::{debug, info, instrument};

use crate::db::{self, Pool};
use crate::model::{NotificationItem, NotificationPayload, TaskParams, MULTICAST_SIZE};
use crate::payload;

/// Partition `tokens` into consecutive chunks of at most `size` entries.
pub fn split_into_batches(tokens: &[String], size: usize) -> Vec<&[String]> {
    tokens.chunks(size.max(1)).collect()
}

/// What a round queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundSummary {
    NoRecipients,
    Single { device: String },
    Multicast { batches: usize, devices: usize },
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundSummary::NoRecipients => {
                write!(f, "Message ignored as there is no device registered!")
            }
            RoundSummary::Single { device } => {
                write!(f, "Single message queued for registration id {}", device)
            }
            RoundSummary::Multicast { batches, devices } => write!(
                f,
                "Queued tasks to send {} multicast messages to {} devices",
                batches, devices
            ),
        }
    }
}

/// Queue delivery of `payload` to every registered device.
#[instrument(skip_all)]
pub async fn start_round(
    pool: &Pool,
    queue: &str,
    payload: &NotificationPayload,
) -> Result<RoundSummary> {
    let devices = db::list_devices(pool).await?;
    fan_out(pool, queue, &devices, payload).await
}

#[instrument(skip_all, fields(devices = devices.len()))]
pub async fn fan_out(
    pool: &Pool,
    queue: &str,
    devices: &[String],
    payload: &NotificationPayload,
) -> Result<RoundSummary> {
    let summary = match devices {
        [] => RoundSummary::NoRecipients,
        [device] => {
            let params = TaskParams::Single {
                device: device.clone(),
                payload: payload.clone(),
            };
            db::enqueue_task(pool, queue, &params, Utc::now()).await?;
            RoundSummary::Single {
                device: device.clone(),
            }
        }
        _ => {
            let chunks = split_into_batches(devices, MULTICAST_SIZE);
            for chunk in &chunks {
                // Batch row and its task become visible together.
                let mut tx = pool.begin().await?;
                let handle = db::batches::create_batch_tx(&mut tx, chunk).await?;
                let params = TaskParams::Multicast {
                    batch: handle,
                    payload: payload.clone(),
                };
                db::repo::enqueue_task_tx(&mut tx, queue, &params, Utc::now()).await?;
                tx.commit().await?;
                debug!(%handle, devices = chunk.len(), "queued multicast batch");
            }
            RoundSummary::Multicast {
                batches: chunks.len(),
                devices: devices.len(),
            }
        }
    };
    info!(%summary, "round started");
    Ok(summary)
}

/// Result of comparing a fresh change set with the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReport {
    /// Nothing stored yet; the set was saved as the baseline.
    FirstSnapshot,
    Unchanged,
    NoNewItems,
    Notified {
        new_items: usize,
        round: RoundSummary,
    },
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeReport::FirstSnapshot => write!(f, "no previous snapshot to compare with"),
            ChangeReport::Unchanged => write!(f, "no changes"),
            ChangeReport::NoNewItems => write!(f, "changed, but no new items"),
            ChangeReport::Notified { new_items, round } => {
                write!(f, "{} new items; {}", new_items, round)
            }
        }
    }
}

/// Diff `current` against the stored snapshot, start a round for new items,
/// then store `current` as the new snapshot.
#[instrument(skip_all, fields(items = current.len()))]
pub async fn notify_changes(
    pool: &Pool,
    queue: &str,
    current: &[NotificationItem],
) -> Result<ChangeReport> {
    let Some(previous) = db::load_snapshot(pool).await? else {
        db::save_snapshot(pool, current).await?;
        return Ok(ChangeReport::FirstSnapshot);
    };
    if previous.as_slice() == current {
        return Ok(ChangeReport::Unchanged);
    }

    let payload = payload::diff(current, &previous);
    let report = if payload.is_empty() {
        ChangeReport::NoNewItems
    } else {
        for item in &payload.items {
            info!(title = %item.title, "new item");
        }
        let round = start_round(pool, queue, &payload).await?;
        ChangeReport::Notified {
            new_items: payload.count(),
            round,
        }
    };
    db::save_snapshot(pool, current).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tok-{i}")).collect()
    }

    #[test]
    fn split_sizes_at_the_boundary() {
        for (n, expected) in [
            (2, vec![2]),
            (999, vec![999]),
            (1000, vec![1000]),
            (1001, vec![1000, 1]),
            (2500, vec![1000, 1000, 500]),
        ] {
            let all = tokens(n);
            let sizes: Vec<usize> = split_into_batches(&all, MULTICAST_SIZE)
                .iter()
                .map(|c| c.len())
                .collect();
            assert_eq!(sizes, expected, "n = {n}");
        }
    }

    #[test]
    fn split_covers_every_token_once_in_order() {
        let all = tokens(2345);
        let chunks = split_into_batches(&all, MULTICAST_SIZE);
        assert_eq!(chunks.len(), all.len().div_ceil(MULTICAST_SIZE));
        let rejoined: Vec<String> = chunks.concat();
        assert_eq!(rejoined, all);
    }

    #[test]
    fn summary_messages() {
        assert_eq!(
            RoundSummary::Multicast {
                batches: 3,
                devices: 2500
            }
            .to_string(),
            "Queued tasks to send 3 multicast messages to 2500 devices"
        );
        assert_eq!(
            RoundSummary::Single {
                device: "abc".into()
            }
            .to_string(),
            "Single message queued for registration id abc"
        );
    }
}
