//! Denylist of invalidated credentials (logged-out tokens, withdrawn grants).
//!
//! Only a SHA-256 digest of each credential is stored, so a dump of the
//! backend reveals nothing usable. Entries live no longer than the
//! credential itself would have, capped at 30 days.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::state::StateBackend;

/// Hard cap on how long a revocation is remembered.
pub const MAX_REVOCATION_TTL_SECS: u64 = 30 * 24 * 3600;

const REVOKED_MARKER: &str = "1";

#[derive(Clone)]
pub struct RevocationRegistry {
    backend: Arc<dyn StateBackend>,
    metrics: Option<Arc<Metrics>>,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

impl RevocationRegistry {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn key_for(token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        format!("revoked:{}", hex::encode(digest))
    }

    /// Revoke `token` for `ttl_secs`, clamped to `[1, 30 days]`.
    pub async fn add(&self, token: &str, ttl_secs: u64) -> AppResult<()> {
        let ttl = ttl_secs.clamp(1, MAX_REVOCATION_TTL_SECS);
        self.backend
            .set(&Self::key_for(token), REVOKED_MARKER.to_string(), ttl)
            .await
    }

    /// Revoke `token` until the moment it would have expired anyway.
    /// Already-expired credentials are not stored.
    pub async fn add_until(&self, token: &str, expires_at: DateTime<Utc>) -> AppResult<()> {
        let remaining = (expires_at - Utc::now()).num_seconds();
        if remaining <= 0 {
            tracing::debug!("credential already expired, not recording revocation");
            return Ok(());
        }
        self.add(token, remaining as u64).await
    }

    /// Revoke a JWT until its `exp` claim. The signature is not checked here;
    /// callers revoke tokens they have already authenticated.
    pub async fn add_jwt(&self, token: &str) -> AppResult<()> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<ExpiryClaim>(
            token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("unreadable token: {}", e)))?;

        let expires_at = DateTime::<Utc>::from_timestamp(data.claims.exp, 0).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("invalid exp claim: {}", data.claims.exp))
        })?;
        self.add_until(token, expires_at).await
    }

    /// Whether `token` is revoked. A backend failure is returned as an
    /// error, never as "not revoked".
    pub async fn is_revoked(&self, token: &str) -> AppResult<bool> {
        let revoked = self.backend.get(&Self::key_for(token)).await?.is_some();
        if let Some(metrics) = &self.metrics {
            metrics.record_revocation_check(revoked);
        }
        Ok(revoked)
    }
}
