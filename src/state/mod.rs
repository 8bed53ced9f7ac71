//! Key/value state shared by the cache, rate limiter and revocation registry.
//!
//! Three implementations of [`StateBackend`]:
//! - [`RedisBackend`]: networked, source of truth across processes.
//! - [`MemoryBackend`]: in-process DashMaps with lazy expiry.
//! - [`ResilientBackend`]: Redis first, memory when Redis is unreachable.
//!
//! One backend is built at startup and shared (`Arc<dyn StateBackend>`) by
//! every higher-level component.

pub mod memory;
pub mod redis;
pub mod resilient;

use async_trait::async_trait;

use crate::errors::AppResult;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;
pub use self::resilient::ResilientBackend;

/// Longest TTL any caller may request (7 days).
pub const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

/// Clamp a caller-supplied TTL to `[1, MAX_TTL_SECS]`.
pub fn clamp_ttl(ttl_secs: u64) -> u64 {
    ttl_secs.clamp(1, MAX_TTL_SECS)
}

/// Counter state returned by a fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Seconds until the window resets.
    pub reset_secs: u64,
}

/// Which backend is currently serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Redis,
    Memory,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Redis => "redis",
            BackendMode::Memory => "memory",
        }
    }
}

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Fetch a raw value. Expired entries are never returned.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Store a raw value with a TTL (already clamped by the caller).
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Atomically increment a fixed-window counter, starting the window on
    /// the first increment.
    async fn incr_window(&self, key: &str, window_secs: u64) -> AppResult<WindowCount>;

    /// Backend serving requests right now.
    fn mode(&self) -> BackendMode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_ttl() {
        assert_eq!(clamp_ttl(0), 1);
        assert_eq!(clamp_ttl(60), 60);
        assert_eq!(clamp_ttl(MAX_TTL_SECS + 1), MAX_TTL_SECS);
        assert_eq!(clamp_ttl(u64::MAX), MAX_TTL_SECS);
    }
}
