//! Grant lifecycle: issuance, revocation and lock health.
//!
//! Persistence is the only step that can fail an operation. Lock calls,
//! notifications, cache invalidation and webhook events are side effects
//! that log on failure and carry on.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::codec::AccessCodeCodec;
use super::validation::AccessValidationEngine;
use crate::errors::{AppError, AppResult};
use crate::lock::{LockDriver, LockStatus};
use crate::models::access::{AccessGrant, IssuedGrant, NewGrantRequest};
use crate::notification::dispatch::WebhookDispatcher;
use crate::notification::webhook::WebhookEvent;
use crate::notification::Notifier;
use crate::revocation::RevocationRegistry;
use crate::store::GrantRepository;

/// Battery percentage below which owners are alerted.
pub const LOW_BATTERY_THRESHOLD: u8 = 20;

#[derive(Clone)]
pub struct AccessService {
    repo: Arc<dyn GrantRepository>,
    codec: AccessCodeCodec,
    validation: AccessValidationEngine,
    revocations: RevocationRegistry,
    lock: Arc<dyn LockDriver>,
    notifier: Arc<dyn Notifier>,
    webhooks: WebhookDispatcher,
}

impl AccessService {
    pub fn new(
        repo: Arc<dyn GrantRepository>,
        codec: AccessCodeCodec,
        validation: AccessValidationEngine,
        revocations: RevocationRegistry,
        lock: Arc<dyn LockDriver>,
        notifier: Arc<dyn Notifier>,
        webhooks: WebhookDispatcher,
    ) -> Self {
        Self {
            repo,
            codec,
            validation,
            revocations,
            lock,
            notifier,
            webhooks,
        }
    }

    /// Create a grant with a fresh code. The plaintext code is returned
    /// once and only its hash is persisted.
    pub async fn issue_access(&self, req: NewGrantRequest) -> AppResult<IssuedGrant> {
        let now = Utc::now();
        if req.end_date <= req.start_date {
            return Err(AppError::InvalidGrant(
                "end date must be after start date".into(),
            ));
        }
        if req.end_date <= now {
            return Err(AppError::InvalidGrant("end date is in the past".into()));
        }

        let code = self
            .codec
            .generate(req.access_type, req.property_id, self.repo.as_ref())
            .await?;

        let codec = self.codec.clone();
        let plain = code.clone();
        let hashed = tokio::task::spawn_blocking(move || codec.hash(&plain))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("code hashing task failed: {}", e)))?;

        let grant = AccessGrant {
            id: Uuid::new_v4(),
            property_id: req.property_id,
            user_id: req.user_id,
            owner_id: req.owner_id,
            access_type: req.access_type,
            code: None,
            hashed_code: Some(hashed),
            start_date: req.start_date,
            end_date: req.end_date,
            is_active: true,
            revoked_at: None,
            revoked_by: None,
            created_at: now,
        };
        self.repo.create_grant(&grant).await?;

        tracing::info!(
            access_id = %grant.id,
            property_id = %grant.property_id,
            access_type = %grant.access_type,
            "access issued"
        );

        if let Err(e) = self.lock.program_code(&grant, &code).await {
            tracing::warn!(access_id = %grant.id, error = %e, "failed to program lock");
        }
        self.validation.invalidate_property(grant.property_id).await;
        self.emit(WebhookEvent::access_created(&grant), grant.owner_id)
            .await;

        Ok(IssuedGrant { grant, code })
    }

    /// Soft-delete a grant and withdraw it everywhere it is honoured.
    pub async fn revoke_access(&self, access_id: Uuid, revoked_by: Uuid) -> AppResult<AccessGrant> {
        let mut grant = self
            .repo
            .find_grant_by_id(access_id)
            .await?
            .ok_or(AppError::GrantNotFound(access_id))?;
        if !grant.is_usable() {
            return Err(AppError::AlreadyRevoked(access_id));
        }

        let now = Utc::now();
        if !self
            .repo
            .update_grant_revocation(access_id, now, revoked_by)
            .await?
        {
            // lost a race with a concurrent revocation
            return Err(AppError::AlreadyRevoked(access_id));
        }
        grant.revoke(revoked_by, now);

        tracing::info!(
            access_id = %grant.id,
            property_id = %grant.property_id,
            %revoked_by,
            "access revoked"
        );

        // Withdraw the grant from validation before any slow external call.
        if let Err(e) = self
            .revocations
            .add_until(&grant.id.to_string(), grant.end_date)
            .await
        {
            tracing::warn!(access_id = %grant.id, error = %e, "failed to record grant revocation");
        }
        self.validation.invalidate_property(grant.property_id).await;

        if let Err(e) = self.lock.revoke_code(&grant).await {
            tracing::warn!(access_id = %grant.id, error = %e, "failed to revoke code on lock");
        }
        if let Err(e) = self.notifier.access_revoked(&grant).await {
            tracing::warn!(access_id = %grant.id, error = %e, "revocation notification failed");
        }
        self.emit(WebhookEvent::access_revoked(&grant), grant.owner_id)
            .await;

        Ok(grant)
    }

    /// Poll the property's lock and alert the owner when its battery runs low.
    pub async fn check_lock_health(&self, property_id: Uuid, owner_id: Uuid) -> AppResult<LockStatus> {
        let status = self.lock.get_status(property_id).await?;
        if !status.online {
            tracing::warn!(%property_id, "lock offline");
        }

        if status.battery_level < LOW_BATTERY_THRESHOLD {
            tracing::warn!(%property_id, battery_level = status.battery_level, "lock battery low");
            if let Err(e) = self
                .notifier
                .low_battery(property_id, status.battery_level)
                .await
            {
                tracing::warn!(%property_id, error = %e, "low battery notification failed");
            }
            self.emit(
                WebhookEvent::lock_battery_low(property_id, status.battery_level),
                owner_id,
            )
            .await;
        }
        Ok(status)
    }

    async fn emit(&self, event: WebhookEvent, owner_id: Uuid) {
        if let Err(e) = self.webhooks.dispatch_event(&event, Some(owner_id)).await {
            tracing::warn!(event_type = %event.event_type, error = %e, "failed to dispatch webhook event");
        }
    }
}
