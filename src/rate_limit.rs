use serde::Serialize;
use std::sync::Arc;

use crate::errors::AppResult;
use crate::metrics::Metrics;
use crate::state::StateBackend;

/// Outcome of one rate-limited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub remaining: u64,
    /// Seconds until the current window resets.
    pub reset_seconds: u64,
}

/// Fixed-window rate limiter.
///
/// Each key owns one counter that resets entirely when its window elapses.
/// A burst straddling a window boundary can admit up to 2x `max_count`.
/// Requests over the limit still increment the counter, so a sustained flood
/// stays visible in the count.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn StateBackend>,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
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

    pub async fn increment_and_get(
        &self,
        key: &str,
        window_secs: u64,
        max_count: u64,
    ) -> AppResult<RateLimitDecision> {
        let redis_key = format!("rate:{}:{}", key, window_secs);
        let window = self.backend.incr_window(&redis_key, window_secs).await?;

        let allowed = window.count <= max_count;
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(allowed);
        }
        if !allowed {
            tracing::warn!(
                rate_limit = true,
                key,
                limit = max_count,
                count = window.count,
                "rate limit exceeded"
            );
        }

        Ok(RateLimitDecision {
            allowed,
            count: window.count,
            remaining: max_count.saturating_sub(window.count),
            reset_seconds: window.reset_secs,
        })
    }
}

/// Parse a window such as "30s", "1m", "1h" or "1d" into seconds.
/// Anything unparseable falls back to one minute.
pub fn parse_window(s: &str) -> u64 {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        Some((i, 'd')) => (&s[..i], 86400),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(unit))
        .unwrap_or(60)
}
