use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

use crate::models::access::AccessGrant;

pub const HEADER_WEBHOOK_ID: &str = "X-Webhook-Id";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_IDEMPOTENCY_KEY: &str = "Idempotency-Key";

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
///
/// `id` is stable across retries and doubles as the receiver's idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    /// Event type identifier, e.g. "access.created", "access.revoked".
    #[serde(rename = "type")]
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    /// Event-specific details.
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event_type: &str, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    pub fn access_created(grant: &AccessGrant) -> Self {
        Self::new(
            "access.created",
            serde_json::json!({
                "accessId": grant.id,
                "propertyId": grant.property_id,
                "userId": grant.user_id,
                "accessType": grant.access_type,
                "startDate": grant.start_date,
                "endDate": grant.end_date,
            }),
        )
    }

    pub fn access_revoked(grant: &AccessGrant) -> Self {
        Self::new(
            "access.revoked",
            serde_json::json!({
                "accessId": grant.id,
                "propertyId": grant.property_id,
                "userId": grant.user_id,
                "revokedAt": grant.revoked_at,
                "revokedBy": grant.revoked_by,
            }),
        )
    }

    pub fn lock_battery_low(property_id: Uuid, battery_level: u8) -> Self {
        Self::new(
            "lock.battery_low",
            serde_json::json!({
                "propertyId": property_id,
                "batteryLevel": battery_level,
            }),
        )
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// `sha256=<hex>` HMAC-SHA256 of `"<timestamp>.<body>"` keyed by `secret`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ── Delivery ─────────────────────────────────────────────────

/// How HTTP responses feed the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Any HTTP response counts as delivered; only transport errors retry.
    #[default]
    TransportOnly,
    /// 2xx delivered; 408, 429 and 5xx retried; any other status is final.
    StatusAware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Retryable(String),
    Terminal(String),
}

/// Signs and POSTs a single delivery attempt.
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl WebhookSender {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("guestkey-webhook/1.0")
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, policy })
    }

    pub async fn deliver(&self, url: &str, secret: &str, event: &WebhookEvent) -> DeliveryOutcome {
        let body = match serde_json::to_string(event) {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::Terminal(format!("serialize error: {}", e)),
        };
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_payload(secret, timestamp, &body);
        let event_id = event.id.to_string();

        let result = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header(HEADER_WEBHOOK_ID, &event_id)
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_SIGNATURE, signature)
            .header(HEADER_IDEMPOTENCY_KEY, &event_id)
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) => classify(self.policy, resp.status().as_u16()),
            Err(e) => DeliveryOutcome::Retryable(format!("transport error: {}", e)),
        }
    }
}

fn classify(policy: RetryPolicy, status: u16) -> DeliveryOutcome {
    match policy {
        RetryPolicy::TransportOnly => DeliveryOutcome::Delivered { status },
        RetryPolicy::StatusAware => match status {
            200..=299 => DeliveryOutcome::Delivered { status },
            408 | 429 | 500..=599 => DeliveryOutcome::Retryable(format!("status {}", status)),
            _ => DeliveryOutcome::Terminal(format!("status {}", status)),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────
