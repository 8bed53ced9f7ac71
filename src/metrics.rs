//! Prometheus metrics for guestkey.
//!
//! Exposed on `/metrics` by the serve command. Each `Metrics` owns its own
//! registry so independent instances (tests, embedded use) never collide.

use prometheus::{opts, Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    state_fallback_total: IntCounterVec,
    validation_outcomes_total: IntCounterVec,
    validation_cache_total: IntCounterVec,
    rate_limit_decisions_total: IntCounterVec,
    revocation_checks_total: IntCounterVec,

    webhook_jobs_enqueued_total: IntCounter,
    webhook_attempts_total: IntCounter,
    webhook_retries_total: IntCounter,
    webhook_deliveries_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let state_fallback_total = IntCounterVec::new(
            opts!(
                "guestkey_state_fallback_total",
                "State operations served by the in-memory backend after a redis failure"
            ),
            &["op"],
        )?;
        let validation_outcomes_total = IntCounterVec::new(
            opts!("guestkey_validation_outcomes_total", "Access code validation outcomes"),
            &["outcome"],
        )?;
        let validation_cache_total = IntCounterVec::new(
            opts!("guestkey_validation_cache_total", "Validation cache lookups"),
            &["result"],
        )?;
        let rate_limit_decisions_total = IntCounterVec::new(
            opts!("guestkey_rate_limit_decisions_total", "Rate limiter decisions"),
            &["allowed"],
        )?;
        let revocation_checks_total = IntCounterVec::new(
            opts!("guestkey_revocation_checks_total", "Revocation registry lookups"),
            &["revoked"],
        )?;
        let webhook_jobs_enqueued_total = IntCounter::with_opts(opts!(
            "guestkey_webhook_jobs_enqueued_total",
            "Webhook delivery jobs enqueued"
        ))?;
        let webhook_attempts_total = IntCounter::with_opts(opts!(
            "guestkey_webhook_attempts_total",
            "Webhook delivery attempts"
        ))?;
        let webhook_retries_total = IntCounter::with_opts(opts!(
            "guestkey_webhook_retries_total",
            "Webhook deliveries scheduled for retry"
        ))?;
        let webhook_deliveries_total = IntCounterVec::new(
            opts!(
                "guestkey_webhook_deliveries_total",
                "Webhook jobs by terminal outcome"
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(state_fallback_total.clone()))?;
        registry.register(Box::new(validation_outcomes_total.clone()))?;
        registry.register(Box::new(validation_cache_total.clone()))?;
        registry.register(Box::new(rate_limit_decisions_total.clone()))?;
        registry.register(Box::new(revocation_checks_total.clone()))?;
        registry.register(Box::new(webhook_jobs_enqueued_total.clone()))?;
        registry.register(Box::new(webhook_attempts_total.clone()))?;
        registry.register(Box::new(webhook_retries_total.clone()))?;
        registry.register(Box::new(webhook_deliveries_total.clone()))?;

        Ok(Self {
            registry,
            state_fallback_total,
            validation_outcomes_total,
            validation_cache_total,
            rate_limit_decisions_total,
            revocation_checks_total,
            webhook_jobs_enqueued_total,
            webhook_attempts_total,
            webhook_retries_total,
            webhook_deliveries_total,
        })
    }

    pub fn record_state_fallback(&self, op: &str) {
        self.state_fallback_total.with_label_values(&[op]).inc();
    }

    pub fn record_validation(&self, outcome: &str) {
        self.validation_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_validation_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.validation_cache_total.with_label_values(&[result]).inc();
    }

    pub fn record_rate_limit(&self, allowed: bool) {
        let allowed = if allowed { "true" } else { "false" };
        self.rate_limit_decisions_total
            .with_label_values(&[allowed])
            .inc();
    }

    pub fn record_revocation_check(&self, revoked: bool) {
        let revoked = if revoked { "true" } else { "false" };
        self.revocation_checks_total
            .with_label_values(&[revoked])
            .inc();
    }

    pub fn record_webhook_enqueued(&self, jobs: u64) {
        self.webhook_jobs_enqueued_total.inc_by(jobs);
    }

    pub fn record_webhook_attempt(&self) {
        self.webhook_attempts_total.inc();
    }

    pub fn record_webhook_retry(&self) {
        self.webhook_retries_total.inc();
    }

    /// `outcome` is one of "delivered", "failed" or "dropped".
    pub fn record_webhook_outcome(&self, outcome: &str) {
        self.webhook_deliveries_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn webhook_attempts(&self) -> u64 {
        self.webhook_attempts_total.get()
    }

    pub fn webhook_outcomes(&self, outcome: &str) -> u64 {
        self.webhook_deliveries_total
            .with_label_values(&[outcome])
            .get()
    }

    pub fn validation_outcomes(&self, outcome: &str) -> u64 {
        self.validation_outcomes_total
            .with_label_values(&[outcome])
            .get()
    }

    pub fn validation_cache_hits(&self) -> u64 {
        self.validation_cache_total.with_label_values(&["hit"]).get()
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("failed to encode prometheus metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_webhook_outcome("delivered");
        assert_eq!(a.webhook_outcomes("delivered"), 1);
        assert_eq!(b.webhook_outcomes("delivered"), 0);
    }

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_validation("VALID");
        metrics.record_state_fallback("get");
        let text = metrics.render();
        assert!(text.contains("guestkey_validation_outcomes_total{outcome=\"VALID\"} 1"));
        assert!(text.contains("guestkey_state_fallback_total{op=\"get\"} 1"));
    }
}
