use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::state::{clamp_ttl, StateBackend};

/// Typed cache over the shared state backend.
///
/// Values are stored as JSON strings; the backend never interprets them.
/// Failures are logged and swallowed: a cache that cannot answer behaves like
/// a miss, and a write that cannot land is dropped.
#[derive(Clone)]
pub struct ResilientStore {
    backend: Arc<dyn StateBackend>,
}

impl ResilientStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn StateBackend> {
        self.backend.clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store `value` for `ttl_secs`, clamped to `[1s, 7 days]`.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize cache entry");
                return;
            }
        };
        if let Err(e) = self.backend.set(key, json, clamp_ttl(ttl_secs)).await {
            tracing::warn!(key, error = %e, "cache write failed, entry dropped");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(key, error = %e, "cache delete failed");
        }
    }
}
