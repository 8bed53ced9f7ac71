use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::{BackendMode, MemoryBackend, RedisBackend, StateBackend, WindowCount};
use crate::errors::{AppError, AppResult};
use crate::metrics::Metrics;

/// Redis first, in-process memory when Redis cannot be reached.
///
/// Connectivity loss never reaches the caller: a failed Redis call marks the
/// backend degraded and the same call is answered from memory. While
/// degraded, Redis is re-probed from a background task at most once per
/// `probe_interval`; requests never wait on a reconnect.
///
/// Read-your-writes across the Redis → memory transition is not preserved.
#[derive(Clone)]
pub struct ResilientBackend {
    inner: Arc<Inner>,
}

struct Inner {
    redis: RwLock<Option<RedisBackend>>,
    client: Option<redis::Client>,
    memory: MemoryBackend,
    /// Serve from memory when Redis is configured but failing.
    fallback_enabled: bool,
    connected: AtomicBool,
    degraded: AtomicBool,
    probing: AtomicBool,
    last_probe: Mutex<Option<Instant>>,
    probe_interval: Duration,
    connect_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

#[derive(Debug, Clone)]
pub struct ResilientOptions {
    pub fallback_enabled: bool,
    pub max_memory_entries: usize,
    pub probe_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ResilientOptions {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            max_memory_entries: 100_000,
            probe_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl ResilientBackend {
    /// Try Redis once; on failure start on the in-memory backend.
    ///
    /// `redis_url = None` runs memory-only and never probes.
    pub async fn connect(
        redis_url: Option<&str>,
        options: ResilientOptions,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let client = match redis_url.map(redis::Client::open).transpose() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "invalid redis url, using in-memory state backend");
                None
            }
        };

        let mut redis = None;
        let mut degraded = false;
        if let Some(client) = &client {
            match RedisBackend::connect_client(client.clone(), options.connect_timeout).await {
                Ok(backend) => {
                    tracing::info!("state backend: redis");
                    redis = Some(backend);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "redis unavailable at startup, using in-memory state backend");
                    degraded = true;
                }
            }
        } else {
            tracing::info!("state backend: in-memory (no redis configured)");
        }

        Self::build(client, redis, degraded, options, metrics)
    }

    /// Memory-only backend; used by tests and single-node deployments.
    pub fn memory_only(max_memory_entries: usize) -> Self {
        let options = ResilientOptions {
            max_memory_entries,
            ..ResilientOptions::default()
        };
        Self::build(None, None, false, options, None)
    }

    fn build(
        client: Option<redis::Client>,
        redis: Option<RedisBackend>,
        degraded: bool,
        options: ResilientOptions,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(redis.is_some()),
                redis: RwLock::new(redis),
                client,
                memory: MemoryBackend::new(options.max_memory_entries),
                fallback_enabled: options.fallback_enabled,
                degraded: AtomicBool::new(degraded),
                probing: AtomicBool::new(false),
                last_probe: Mutex::new(None),
                probe_interval: options.probe_interval,
                connect_timeout: options.connect_timeout,
                metrics,
            }),
        }
    }

    /// The in-process tier, for the sweep job.
    pub fn memory(&self) -> &MemoryBackend {
        &self.inner.memory
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    async fn active_redis(&self) -> Option<RedisBackend> {
        if self.is_degraded() {
            self.maybe_probe();
            return None;
        }
        self.inner.redis.read().await.clone()
    }

    fn fallback(&self) -> AppResult<&MemoryBackend> {
        if self.inner.fallback_enabled || self.inner.client.is_none() {
            Ok(&self.inner.memory)
        } else {
            Err(AppError::StateUnavailable(
                "redis unreachable and in-memory fallback disabled".into(),
            ))
        }
    }

    fn mark_degraded(&self, op: &'static str, err: &AppError) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_state_fallback(op);
        }
        if !self.inner.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(op, error = %err, "redis operation failed, switching to in-memory state backend");
        } else {
            tracing::debug!(op, error = %err, "redis operation failed while degraded");
        }
    }

    /// Spawn a background reconnect attempt if one is due.
    fn maybe_probe(&self) {
        let Some(client) = self.inner.client.clone() else {
            return;
        };
        if self.inner.probing.swap(true, Ordering::AcqRel) {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let inner = &this.inner;
            let due = {
                let last = inner.last_probe.lock().await;
                last.map_or(true, |at| at.elapsed() >= inner.probe_interval)
            };
            if due {
                *inner.last_probe.lock().await = Some(Instant::now());
                let existing = inner.redis.read().await.clone();
                let result = match existing {
                    Some(backend) => backend.ping().await.map(|_| backend),
                    None => RedisBackend::connect_client(client, inner.connect_timeout).await,
                };
                match result {
                    Ok(backend) => {
                        *inner.redis.write().await = Some(backend);
                        inner.connected.store(true, Ordering::Release);
                        inner.degraded.store(false, Ordering::Release);
                        tracing::info!("redis reachable again, leaving in-memory fallback");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "redis probe failed, staying on in-memory backend");
                    }
                }
            }
            inner.probing.store(false, Ordering::Release);
        });
    }
}

#[async_trait]
impl StateBackend for ResilientBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        if let Some(redis) = self.active_redis().await {
            match redis.get(key).await {
                Ok(v) => return Ok(v),
                Err(e) => self.mark_degraded("get", &e),
            }
        }
        self.fallback()?.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> AppResult<()> {
        if let Some(redis) = self.active_redis().await {
            match redis.set(key, value.clone(), ttl_secs).await {
                Ok(()) => return Ok(()),
                Err(e) => self.mark_degraded("set", &e),
            }
        }
        self.fallback()?.set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        if let Some(redis) = self.active_redis().await {
            match redis.delete(key).await {
                Ok(()) => return Ok(()),
                Err(e) => self.mark_degraded("delete", &e),
            }
        }
        self.fallback()?.delete(key).await
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> AppResult<WindowCount> {
        if let Some(redis) = self.active_redis().await {
            match redis.incr_window(key, window_secs).await {
                Ok(count) => return Ok(count),
                Err(e) => self.mark_degraded("incr_window", &e),
            }
        }
        self.fallback()?.incr_window(key, window_secs).await
    }

    fn mode(&self) -> BackendMode {
        if self.inner.connected.load(Ordering::Acquire) && !self.is_degraded() {
            BackendMode::Redis
        } else {
            BackendMode::Memory
        }
    }
}
