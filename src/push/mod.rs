use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::DeliveryOutcome;
use crate::payload::PushMessage;
use crate::push::model::{SendRequest, SendResponse, SendResult};

pub mod model;

/// Call-level failure: no per-recipient report is available.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push provider unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push provider unavailable ({0})")]
    Unavailable(StatusCode),
    #[error("push provider error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid push provider response: {0}")]
    Decode(String),
}

/// Outbound push delivery.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn send_single(
        &self,
        message: &PushMessage,
        token: &str,
    ) -> Result<DeliveryOutcome, TransportError>;

    /// Outcomes are index-aligned with `tokens`.
    async fn send_multicast(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<Vec<DeliveryOutcome>, TransportError>;
}

#[derive(Clone)]
pub struct GcmClient {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for GcmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcmClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GcmClient {
    pub fn new(api_key: String, endpoint: Url) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent("change-notifier/0.1")
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let endpoint = Url::parse(cfg.push.endpoint.trim())?;
        Ok(Self::new(cfg.push.api_key.clone(), endpoint)?)
    }

    pub fn build_request(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<reqwest::Request, TransportError> {
        let body = SendRequest {
            registration_ids: tokens,
            data: message,
        };
        Ok(self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", format!("key={}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .build()?)
    }

    async fn execute(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<Vec<DeliveryOutcome>, TransportError> {
        let request = self.build_request(message, tokens)?;
        debug!(url = %request.url(), recipients = tokens.len(), "posting push message");

        let res = self.http.execute(request).await?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!(%status, "push provider unavailable");
            return Err(TransportError::Unavailable(status));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body = %body, "push provider rejected request");
            return Err(TransportError::Status { status, body });
        }

        let body = res.text().await?;
        let outcomes = parse_response(&body, tokens.len())?;
        Ok(outcomes)
    }
}

#[async_trait]
impl PushService for GcmClient {
    async fn send_single(
        &self,
        message: &PushMessage,
        token: &str,
    ) -> Result<DeliveryOutcome, TransportError> {
        let tokens = [token.to_string()];
        let mut outcomes = self.execute(message, &tokens).await?;
        outcomes
            .pop()
            .ok_or_else(|| TransportError::Decode("empty result list".into()))
    }

    async fn send_multicast(
        &self,
        message: &PushMessage,
        tokens: &[String],
    ) -> Result<Vec<DeliveryOutcome>, TransportError> {
        self.execute(message, tokens).await
    }
}

/// Decode a provider response into outcomes aligned with the request's
/// `expected` recipients.
pub fn parse_response(body: &str, expected: usize) -> Result<Vec<DeliveryOutcome>, TransportError> {
    let resp: SendResponse =
        serde_json::from_str(body).map_err(|err| TransportError::Decode(err.to_string()))?;
    if resp.results.len() != expected {
        return Err(TransportError::Decode(format!(
            "expected {} results, got {}",
            expected,
            resp.results.len()
        )));
    }
    info!(
        multicast_id = ?resp.multicast_id,
        success = resp.success,
        failure = resp.failure,
        canonical_ids = resp.canonical_ids,
        "push provider report"
    );
    Ok(resp.results.into_iter().map(outcome_of).collect())
}

fn outcome_of(result: SendResult) -> DeliveryOutcome {
    if result.message_id.is_some() {
        return match result.registration_id {
            Some(canonical) if !canonical.is_empty() => {
                DeliveryOutcome::DeliveredWithRotation(canonical)
            }
            _ => DeliveryOutcome::Delivered,
        };
    }
    match result.error.as_deref() {
        Some("Unavailable") | Some("InternalServerError") => DeliveryOutcome::TransientFailure,
        Some("NotRegistered") | Some("InvalidRegistration") => DeliveryOutcome::PermanentlyInvalid,
        Some(code) => DeliveryOutcome::Rejected(code.to_string()),
        None => DeliveryOutcome::Rejected("MissingMessageId".to_string()),
    }
}
