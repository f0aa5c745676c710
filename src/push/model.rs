use serde::{Deserialize, Serialize};

use crate::payload::PushMessage;

#[derive(Serialize, Debug)]
pub struct SendRequest<'a> {
    pub registration_ids: &'a [String],
    pub data: &'a PushMessage,
}

#[derive(Deserialize, Debug)]
pub struct SendResponse {
    #[serde(default)]
    pub multicast_id: Option<i64>,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub canonical_ids: u32,
    #[serde(default)]
    pub results: Vec<SendResult>,
}

#[derive(Deserialize, Debug)]
pub struct SendResult {
    pub message_id: Option<String>,
    pub registration_id: Option<String>,
    pub error: Option<String>,
}
