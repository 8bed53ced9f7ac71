use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GrantRepository, NewWebhookEndpoint, WebhookEndpointRepository};
use crate::access::codec::AccessCodeCodec;
use crate::models::access::AccessGrant;
use crate::models::webhook::WebhookEndpoint;

/// Process-local repository. Shared, cheaply cloneable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    grants: Arc<RwLock<HashMap<Uuid, AccessGrant>>>,
    endpoints: Arc<RwLock<Vec<WebhookEndpoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a grant verbatim. Used to seed fixtures and
    /// pre-hashing legacy rows.
    pub async fn put_grant(&self, grant: AccessGrant) {
        self.grants.write().await.insert(grant.id, grant);
    }

    pub async fn grant_count(&self) -> usize {
        self.grants.read().await.len()
    }
}

#[async_trait]
impl GrantRepository for MemoryStore {
    async fn find_active_grants_by_property(
        &self,
        property_id: Uuid,
    ) -> anyhow::Result<Vec<AccessGrant>> {
        let grants = self.grants.read().await;
        let mut found: Vec<AccessGrant> = grants
            .values()
            .filter(|g| g.property_id == property_id && g.is_usable())
            .cloned()
            .collect();
        found.sort_by_key(|g| g.created_at);
        Ok(found)
    }

    async fn find_grant_by_id(&self, id: Uuid) -> anyhow::Result<Option<AccessGrant>> {
        Ok(self.grants.read().await.get(&id).cloned())
    }

    async fn create_grant(&self, grant: &AccessGrant) -> anyhow::Result<()> {
        let mut grants = self.grants.write().await;
        if grants.contains_key(&grant.id) {
            anyhow::bail!("access grant {} already exists", grant.id);
        }
        grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn update_grant_revocation(
        &self,
        id: Uuid,
        revoked_at: DateTime<Utc>,
        revoked_by: Uuid,
    ) -> anyhow::Result<bool> {
        let mut grants = self.grants.write().await;
        match grants.get_mut(&id) {
            Some(grant) if grant.is_usable() => {
                grant.revoke(revoked_by, revoked_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists_grant_with_code(
        &self,
        property_id: Uuid,
        code: &str,
    ) -> anyhow::Result<bool> {
        let grants = self.grants.read().await;
        Ok(grants
            .values()
            .filter(|g| g.property_id == property_id && g.is_usable())
            .any(|g| AccessCodeCodec::matches_grant(code, g)))
    }
}

#[async_trait]
impl WebhookEndpointRepository for MemoryStore {
    async fn list_active_webhook_endpoints(
        &self,
        owner_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<WebhookEndpoint>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints
            .iter()
            .filter(|e| e.is_active && (e.owner_id.is_none() || e.owner_id == owner_id))
            .cloned()
            .collect())
    }

    async fn create_webhook_endpoint(
        &self,
        endpoint: &NewWebhookEndpoint,
    ) -> anyhow::Result<WebhookEndpoint> {
        endpoint.validate()?;
        let created = WebhookEndpoint {
            id: Uuid::new_v4(),
            url: endpoint.url.clone(),
            secret: endpoint.secret.clone(),
            events: endpoint.events.clone(),
            owner_id: endpoint.owner_id,
            is_active: true,
            created_at: Utc::now(),
        };
        self.endpoints.write().await.push(created.clone());
        Ok(created)
    }

    async fn delete_webhook_endpoint(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut endpoints = self.endpoints.write().await;
        let before = endpoints.len();
        endpoints.retain(|e| e.id != id);
        Ok(endpoints.len() < before)
    }
}
