//! Change-set diffing and push message construction.
use std::collections::{BTreeMap, HashSet};

use crate::model::{NotificationItem, NotificationPayload};

/// Key/value data attached to a push message.
pub type PushMessage = BTreeMap<String, String>;

/// Items of `current` whose title is absent from `previous`, in the order
/// they appear in `current`.
pub fn diff(current: &[NotificationItem], previous: &[NotificationItem]) -> NotificationPayload {
    let seen: HashSet<&str> = previous.iter().map(|item| item.title.as_str()).collect();
    let items = current
        .iter()
        .filter(|item| !seen.contains(item.title.as_str()))
        .cloned()
        .collect();
    NotificationPayload { items }
}

/// Flatten a payload into the data fields sent to devices:
/// `INDEX` holds the item count, then `TITLEn`/`URLn`/`ICONn` for n in 1..=count.
pub fn build_message(payload: &NotificationPayload) -> PushMessage {
    let mut data = PushMessage::new();
    data.insert("INDEX".to_string(), payload.count().to_string());
    for (i, item) in payload.items.iter().enumerate() {
        let n = i + 1;
        data.insert(format!("TITLE{n}"), item.title.clone());
        data.insert(format!("URL{n}"), item.url.clone());
        data.insert(format!("ICON{n}"), item.icon.clone());
    }
    data
}
