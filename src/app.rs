//! `AccessControl`: the single entry point callers use.
//!
//! It wires the validation engine, rate limiter, revocation registry, grant
//! lifecycle and webhook fan-out over one shared state backend.

use std::sync::Arc;
use uuid::Uuid;

use crate::access::{AccessCodeCodec, AccessService, AccessValidationEngine, ValidationResult};
use crate::cache::ResilientStore;
use crate::errors::{AppError, AppResult};
use crate::lock::{LockDriver, LockStatus};
use crate::metrics::Metrics;
use crate::models::access::{AccessGrant, IssuedGrant, NewGrantRequest};
use crate::notification::dispatch::WebhookDispatcher;
use crate::notification::webhook::WebhookEvent;
use crate::notification::Notifier;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::revocation::{RevocationRegistry, MAX_REVOCATION_TTL_SECS};
use crate::state::StateBackend;
use crate::store::GrantRepository;

#[derive(Debug, Clone, Copy)]
pub struct AccessControlSettings {
    pub code_hash_iterations: u32,
    /// Validation attempts per actor per window; 0 disables the limit.
    pub validate_rate_limit: u64,
    pub validate_rate_window: u64,
}

impl Default for AccessControlSettings {
    fn default() -> Self {
        Self {
            code_hash_iterations: crate::access::codec::DEFAULT_ITERATIONS,
            validate_rate_limit: 10,
            validate_rate_window: 60,
        }
    }
}

impl From<&crate::config::Config> for AccessControlSettings {
    fn from(cfg: &crate::config::Config) -> Self {
        Self {
            code_hash_iterations: cfg.code_hash_iterations,
            validate_rate_limit: cfg.validate_rate_limit,
            validate_rate_window: cfg.validate_rate_window,
        }
    }
}

#[derive(Clone)]
pub struct AccessControl {
    backend: Arc<dyn StateBackend>,
    validation: AccessValidationEngine,
    rate_limiter: RateLimiter,
    revocations: RevocationRegistry,
    service: AccessService,
    webhooks: WebhookDispatcher,
    settings: AccessControlSettings,
}

impl AccessControl {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        grants: Arc<dyn GrantRepository>,
        lock: Arc<dyn LockDriver>,
        notifier: Arc<dyn Notifier>,
        webhooks: WebhookDispatcher,
        metrics: Arc<Metrics>,
        settings: AccessControlSettings,
    ) -> Self {
        let revocations = RevocationRegistry::new(backend.clone()).with_metrics(metrics.clone());
        let validation =
            AccessValidationEngine::new(grants.clone(), ResilientStore::new(backend.clone()))
                .with_revocations(revocations.clone())
                .with_metrics(metrics.clone());
        let rate_limiter = RateLimiter::new(backend.clone()).with_metrics(metrics);
        let service = AccessService::new(
            grants,
            AccessCodeCodec::new(settings.code_hash_iterations),
            validation.clone(),
            revocations.clone(),
            lock,
            notifier,
            webhooks.clone(),
        );

        Self {
            backend,
            validation,
            rate_limiter,
            revocations,
            service,
            webhooks,
            settings,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    pub async fn validate_code(&self, code: &str, property_id: Uuid) -> AppResult<ValidationResult> {
        self.validation.validate(code, property_id).await
    }

    /// `validate_code`, throttled per actor (client IP, device id, ...).
    pub async fn validate_code_for(
        &self,
        actor: &str,
        code: &str,
        property_id: Uuid,
    ) -> AppResult<ValidationResult> {
        if self.settings.validate_rate_limit > 0 {
            let decision = self
                .check_rate_limit(
                    &format!("validate:{}", actor),
                    self.settings.validate_rate_window,
                    self.settings.validate_rate_limit,
                )
                .await?;
            if !decision.allowed {
                return Err(AppError::RateLimited {
                    reset_secs: decision.reset_seconds,
                });
            }
        }
        self.validate_code(code, property_id).await
    }

    pub async fn check_rate_limit(
        &self,
        actor_key: &str,
        window_secs: u64,
        max_count: u64,
    ) -> AppResult<RateLimitDecision> {
        self.rate_limiter
            .increment_and_get(actor_key, window_secs, max_count)
            .await
    }

    pub async fn is_token_revoked(&self, token: &str) -> AppResult<bool> {
        self.revocations.is_revoked(token).await
    }

    /// Revoke a session token. JWTs are remembered until their `exp`; any
    /// other token for the registry's maximum retention.
    pub async fn revoke_token(&self, token: &str) -> AppResult<()> {
        match self.revocations.add_jwt(token).await {
            Ok(()) => Ok(()),
            Err(AppError::Internal(e)) => {
                tracing::debug!(error = %e, "token has no readable expiry, using maximum retention");
                self.revocations.add(token, MAX_REVOCATION_TTL_SECS).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn dispatch_event(&self, event: &WebhookEvent, owner_id: Option<Uuid>) -> AppResult<usize> {
        self.webhooks.dispatch_event(event, owner_id).await
    }

    pub async fn issue_access(&self, req: NewGrantRequest) -> AppResult<IssuedGrant> {
        self.service.issue_access(req).await
    }

    pub async fn revoke_access(&self, access_id: Uuid, revoked_by: Uuid) -> AppResult<AccessGrant> {
        self.service.revoke_access(access_id, revoked_by).await
    }

    pub async fn check_lock_health(&self, property_id: Uuid, owner_id: Uuid) -> AppResult<LockStatus> {
        self.service.check_lock_health(property_id, owner_id).await
    }

    /// Discard cached validation verdicts after grants change out of band.
    pub async fn invalidate_property(&self, property_id: Uuid) {
        self.validation.invalidate_property(property_id).await
    }
}
