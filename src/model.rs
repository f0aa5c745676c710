use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Provider limit on recipients per multicast request.
pub const MULTICAST_SIZE: usize = 1000;

/// Retry ceiling applied when the configuration does not override it.
pub const MAX_RETRY: u32 = 3;

/// Opaque, shareable identifier of a persisted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchHandle(Uuid);

impl BatchHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BatchHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// One entry of a change set: a headline with its link and icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub icon: String,
}

/// Items that are new since the previously observed change set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub items: Vec<NotificationItem>,
}

impl NotificationPayload {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of delivering to one recipient in one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Delivered, but the provider now knows the device by another token.
    DeliveredWithRotation(String),
    PermanentlyInvalid,
    TransientFailure,
    /// Provider refused the message for a reason that neither a retry nor
    /// unregistering would fix (e.g. payload too big).
    Rejected(String),
}

/// Parameters of a delivery task, persisted as JSON in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskParams {
    Single {
        device: String,
        payload: NotificationPayload,
    },
    Multicast {
        batch: BatchHandle,
        payload: NotificationPayload,
    },
}

impl TaskParams {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskParams::Single { .. } => "single",
            TaskParams::Multicast { .. } => "multicast",
        }
    }

    pub fn payload(&self) -> &NotificationPayload {
        match self {
            TaskParams::Single { payload, .. } | TaskParams::Multicast { payload, .. } => payload,
        }
    }
}

/// What the queue should do with a task after one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskVerdict {
    Done,
    Retry,
}
