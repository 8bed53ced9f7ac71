use std::time::Duration;

use crate::rate_limit::parse_window;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Unset means the process runs on the in-memory state backend only.
    pub redis_url: Option<String>,
    /// When false, Redis failures surface as errors instead of falling back.
    pub memory_fallback: bool,
    /// Upper bound on entries held by the in-memory backend.
    pub memory_max_entries: usize,
    /// Interval between sweeps of expired in-memory entries. 0 = disabled.
    pub memory_sweep_secs: u64,
    /// Minimum delay between background Redis reconnect probes.
    pub redis_probe_secs: u64,
    pub slack_webhook_url: Option<String>,
    pub webhook_workers: usize,
    pub webhook_max_attempts: u32,
    pub webhook_backoff_ms: u64,
    pub webhook_timeout_secs: u64,
    /// Retry on 5xx and drop on 4xx instead of treating any response as delivered.
    pub webhook_retry_on_status: bool,
    /// Optional JSON-lines file receiving jobs that exhausted their retries.
    pub webhook_dead_letter_path: Option<String>,
    pub code_hash_iterations: u32,
    /// Per-actor validation attempts allowed per window. 0 = disabled.
    pub validate_rate_limit: u64,
    /// Window in seconds for `validate_rate_limit`, e.g. "1m" or "30s".
    pub validate_rate_window: u64,
}

impl Config {
    pub fn webhook_backoff(&self) -> Duration {
        Duration::from_millis(self.webhook_backoff_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env_mode = std::env::var("GUESTKEY_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();

    let code_hash_iterations = env_parse("GUESTKEY_CODE_HASH_ITERATIONS", 100_000u32);
    if code_hash_iterations < 10_000 {
        if env_mode == "production" {
            anyhow::bail!(
                "GUESTKEY_CODE_HASH_ITERATIONS={} is too low for production (minimum 10000)",
                code_hash_iterations
            );
        }
        eprintln!(
            "⚠️  GUESTKEY_CODE_HASH_ITERATIONS={} is below 10000, acceptable for development only.",
            code_hash_iterations
        );
    }

    let webhook_workers = env_parse("GUESTKEY_WEBHOOK_WORKERS", 5usize);
    if webhook_workers == 0 {
        anyhow::bail!("GUESTKEY_WEBHOOK_WORKERS must be at least 1");
    }

    Ok(Config {
        port: env_parse("GUESTKEY_PORT", 8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/guestkey".into()),
        redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
        memory_fallback: env_flag("GUESTKEY_MEMORY_FALLBACK", true),
        memory_max_entries: env_parse("GUESTKEY_MEMORY_MAX_ENTRIES", 100_000usize),
        memory_sweep_secs: env_parse("GUESTKEY_MEMORY_SWEEP_SECS", 60u64),
        redis_probe_secs: env_parse("GUESTKEY_REDIS_PROBE_SECS", 30u64),
        slack_webhook_url: std::env::var("GUESTKEY_SLACK_WEBHOOK_URL").ok(),
        webhook_workers,
        webhook_max_attempts: env_parse("GUESTKEY_WEBHOOK_MAX_ATTEMPTS", 5u32).max(1),
        webhook_backoff_ms: env_parse("GUESTKEY_WEBHOOK_BACKOFF_MS", 1_000u64),
        webhook_timeout_secs: env_parse("GUESTKEY_WEBHOOK_TIMEOUT_SECS", 10u64),
        webhook_retry_on_status: env_flag("GUESTKEY_WEBHOOK_RETRY_ON_STATUS", false),
        webhook_dead_letter_path: std::env::var("GUESTKEY_WEBHOOK_DEAD_LETTER_PATH").ok(),
        code_hash_iterations,
        validate_rate_limit: env_parse("GUESTKEY_VALIDATE_RATE_LIMIT", 10u64),
        validate_rate_window: parse_window(
            &std::env::var("GUESTKEY_VALIDATE_RATE_WINDOW").unwrap_or_else(|_| "1m".into()),
        ),
    })
}
