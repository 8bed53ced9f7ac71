//! Persistence ports consumed by the access and webhook layers.
//!
//! Implementations: `PgStore` (Postgres via sqlx) and `MemoryStore`
//! (process-local, for tests and single-node demos).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::access::AccessGrant;
use crate::models::webhook::WebhookEndpoint;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Active, non-revoked grants of one property.
    async fn find_active_grants_by_property(
        &self,
        property_id: Uuid,
    ) -> anyhow::Result<Vec<AccessGrant>>;

    async fn find_grant_by_id(&self, id: Uuid) -> anyhow::Result<Option<AccessGrant>>;

    async fn create_grant(&self, grant: &AccessGrant) -> anyhow::Result<()>;

    /// Soft-delete: the only mutation a grant ever receives. Returns false if
    /// the grant does not exist or is already revoked.
    async fn update_grant_revocation(
        &self,
        id: Uuid,
        revoked_at: DateTime<Utc>,
        revoked_by: Uuid,
    ) -> anyhow::Result<bool>;

    /// Whether any active, non-revoked grant of `property_id` already answers
    /// to `code`, including grants whose window has passed.
    async fn exists_grant_with_code(&self, property_id: Uuid, code: &str)
        -> anyhow::Result<bool>;
}

/// Fields supplied when registering an endpoint.
#[derive(Debug, Clone)]
pub struct NewWebhookEndpoint {
    pub url: String,
    pub secret: String,
    pub events: Option<String>,
    pub owner_id: Option<Uuid>,
}

impl NewWebhookEndpoint {
    /// Only absolute http(s) URLs are accepted.
    pub fn validate(&self) -> anyhow::Result<()> {
        let parsed = url::Url::parse(&self.url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("webhook url must be http or https, got {}", parsed.scheme());
        }
        if self.secret.is_empty() {
            anyhow::bail!("webhook secret must not be empty");
        }
        Ok(())
    }
}

#[async_trait]
pub trait WebhookEndpointRepository: Send + Sync {
    /// Active endpoints of `owner_id` plus every global endpoint.
    /// `None` returns global endpoints only.
    async fn list_active_webhook_endpoints(
        &self,
        owner_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<WebhookEndpoint>>;

    async fn create_webhook_endpoint(
        &self,
        endpoint: &NewWebhookEndpoint,
    ) -> anyhow::Result<WebhookEndpoint>;

    async fn delete_webhook_endpoint(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_endpoint(url: &str) -> NewWebhookEndpoint {
        NewWebhookEndpoint {
            url: url.into(),
            secret: "whsec".into(),
            events: None,
            owner_id: None,
        }
    }

    #[test]
    fn test_endpoint_url_validation() {
        assert!(new_endpoint("https://hooks.example.com/guestkey").validate().is_ok());
        assert!(new_endpoint("http://localhost:9000/hook").validate().is_ok());
        assert!(new_endpoint("ftp://example.com").validate().is_err());
        assert!(new_endpoint("not a url").validate().is_err());
    }

    #[test]
    fn test_endpoint_secret_required() {
        let mut ep = new_endpoint("https://example.com");
        ep.secret.clear();
        assert!(ep.validate().is_err());
    }
}
