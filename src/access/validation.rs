use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::codec::AccessCodeCodec;
use crate::cache::ResilientStore;
use crate::errors::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::models::access::AccessGrant;
use crate::revocation::RevocationRegistry;
use crate::state::MAX_TTL_SECS;

/// NOT_STARTED / EXPIRED verdicts are cached briefly to blunt repeated
/// probing without pinning a stale verdict once the window opens.
pub const DENIED_CACHE_TTL_SECS: u64 = 60;

/// VALID verdicts never outlive the grant, and never exceed a day.
pub const MAX_VALID_CACHE_TTL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationReason {
    CodeInvalid,
    NotStarted,
    Expired,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::CodeInvalid => "CODE_INVALID",
            ValidationReason::NotStarted => "NOT_STARTED",
            ValidationReason::Expired => "EXPIRED",
        }
    }
}

/// What a validation caller sees: either the matched grant's identifiers or
/// the reason the code was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ValidationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl ValidationResult {
    fn granted(grant: &AccessGrant) -> Self {
        Self {
            valid: true,
            reason: None,
            access_id: Some(grant.id),
            property_id: Some(grant.property_id),
            user_id: Some(grant.user_id),
        }
    }

    fn denied(reason: ValidationReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            access_id: None,
            property_id: None,
            user_id: None,
        }
    }

    /// "VALID" or the refusal reason; used as a metrics label.
    pub fn outcome(&self) -> &'static str {
        match self.reason {
            Some(reason) => reason.as_str(),
            None => "VALID",
        }
    }
}

/// Decide the outcome for an (optional) matching grant at `now`, and how
/// long the verdict may be cached (`None` = do not cache).
pub fn decide(grant: Option<&AccessGrant>, now: DateTime<Utc>) -> (ValidationResult, Option<u64>) {
    let Some(grant) = grant else {
        // Never cached: a grant created a moment later must be usable at once.
        return (ValidationResult::denied(ValidationReason::CodeInvalid), None);
    };

    if now < grant.start_date {
        return (
            ValidationResult::denied(ValidationReason::NotStarted),
            Some(DENIED_CACHE_TTL_SECS),
        );
    }
    if now >= grant.end_date {
        return (
            ValidationResult::denied(ValidationReason::Expired),
            Some(DENIED_CACHE_TTL_SECS),
        );
    }

    let remaining = (grant.end_date - now).num_seconds();
    let ttl = (remaining >= 1).then(|| (remaining as u64).min(MAX_VALID_CACHE_TTL_SECS));
    (ValidationResult::granted(grant), ttl)
}

/// Among grants answering to the same code, the one open at `now` wins,
/// then one that has not started yet, then an expired one.
fn preferred(matches: Vec<AccessGrant>, now: DateTime<Utc>) -> Option<AccessGrant> {
    matches.into_iter().min_by_key(|g| {
        if now < g.start_date {
            1
        } else if now >= g.end_date {
            2
        } else {
            0
        }
    })
}

/// Decides whether a code opens a property, caching verdicts.
///
/// Cache keys hold a digest of the code, never the code, and a per-property
/// generation. Issuance and revocation bump the generation through
/// `invalidate_property`, which orphans every cached verdict of the property.
/// A VALID verdict, cached or fresh, is refused when the grant id is in the
/// revocation registry.
#[derive(Clone)]
pub struct AccessValidationEngine {
    repo: Arc<dyn crate::store::GrantRepository>,
    cache: ResilientStore,
    revocations: Option<RevocationRegistry>,
    metrics: Option<Arc<Metrics>>,
}

impl AccessValidationEngine {
    pub fn new(repo: Arc<dyn crate::store::GrantRepository>, cache: ResilientStore) -> Self {
        Self {
            repo,
            cache,
            revocations: None,
            metrics: None,
        }
    }

    pub fn with_revocations(mut self, revocations: RevocationRegistry) -> Self {
        self.revocations = Some(revocations);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn validate(&self, code: &str, property_id: Uuid) -> AppResult<ValidationResult> {
        self.validate_at(code, property_id, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        code: &str,
        property_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<ValidationResult> {
        let result = self.lookup(code, property_id, now).await?;
        let result = self.screen_revoked(result).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_validation(result.outcome());
        }
        Ok(result)
    }

    async fn lookup(
        &self,
        code: &str,
        property_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<ValidationResult> {
        let key = self.cache_key(property_id, code).await;

        if let Some(cached) = self.cache.get::<ValidationResult>(&key).await {
            tracing::debug!(%property_id, outcome = cached.outcome(), "validation cache hit");
            if let Some(metrics) = &self.metrics {
                metrics.record_validation_cache(true);
            }
            return Ok(cached);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_validation_cache(false);
        }

        let grants = self.repo.find_active_grants_by_property(property_id).await?;
        let candidate = code.to_string();
        // PBKDF2 is deliberately slow; keep it off the async workers.
        let matched = tokio::task::spawn_blocking(move || {
            let matches = grants
                .into_iter()
                .filter(|g| g.property_id == property_id && g.is_usable())
                .filter(|g| AccessCodeCodec::matches_grant(&candidate, g))
                .collect();
            preferred(matches, now)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("code verification task failed: {}", e)))?;

        let (result, ttl) = decide(matched.as_ref(), now);
        if let Some(ttl) = ttl {
            self.cache.set(&key, &result, ttl).await;
        }

        tracing::info!(
            %property_id,
            outcome = result.outcome(),
            access_id = ?result.access_id,
            "access code validated"
        );
        Ok(result)
    }

    /// Turn a VALID verdict for a revoked grant into CODE_INVALID. A registry
    /// failure is returned, never treated as "not revoked".
    async fn screen_revoked(&self, result: ValidationResult) -> AppResult<ValidationResult> {
        let (Some(revocations), Some(access_id)) = (&self.revocations, result.access_id) else {
            return Ok(result);
        };
        if !result.valid || !revocations.is_revoked(&access_id.to_string()).await? {
            return Ok(result);
        }
        tracing::warn!(%access_id, "verdict for revoked grant refused");
        Ok(ValidationResult::denied(ValidationReason::CodeInvalid))
    }

    /// Drop every cached verdict for `property_id`.
    pub async fn invalidate_property(&self, property_id: Uuid) {
        let generation = Uuid::new_v4().simple().to_string();
        self.cache
            .set(&generation_key(property_id), &generation, MAX_TTL_SECS)
            .await;
    }

    async fn cache_key(&self, property_id: Uuid, code: &str) -> String {
        let generation = self
            .cache
            .get::<String>(&generation_key(property_id))
            .await
            .unwrap_or_else(|| "0".to_string());

        let mut hasher = Sha256::new();
        hasher.update(property_id.as_bytes());
        hasher.update(b":");
        hasher.update(code.as_bytes());
        format!(
            "access:validate:{}:{}:{}",
            property_id,
            generation,
            hex::encode(hasher.finalize())
        )
    }
}

fn generation_key(property_id: Uuid) -> String {
    format!("access:gen:{}", property_id)
}
