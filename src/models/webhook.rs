use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A receiver registered for outbound event notifications.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub url: String,
    /// HMAC signing key; never echoed back to API callers.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Comma-separated event type allow-list. `None` = every event type.
    pub events: Option<String>,
    /// `None` = global endpoint, notified for every owner.
    pub owner_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Exact match against each entry of the allow-list.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        match &self.events {
            None => true,
            Some(list) => list.split(',').map(str::trim).any(|e| e == event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(events: Option<&str>) -> WebhookEndpoint {
        WebhookEndpoint {
            id: Uuid::new_v4(),
            url: "https://example.com/hook".into(),
            secret: "s".into(),
            events: events.map(String::from),
            owner_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_allow_list_matches_everything() {
        assert!(endpoint(None).subscribes_to("access.created"));
        assert!(endpoint(None).subscribes_to("lock.battery_low"));
    }

    #[test]
    fn test_allow_list_exact_match() {
        let ep = endpoint(Some("access.created, access.revoked"));
        assert!(ep.subscribes_to("access.created"));
        assert!(ep.subscribes_to("access.revoked"));
        assert!(!ep.subscribes_to("access"));
        assert!(!ep.subscribes_to("access.created.v2"));
        assert!(!ep.subscribes_to("lock.battery_low"));
    }

    #[test]
    fn test_secret_not_serialized() {
        let json = serde_json::to_value(endpoint(None)).unwrap();
        assert!(json.get("secret").is_none());
    }
}
