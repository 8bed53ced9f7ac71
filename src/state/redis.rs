use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::{BackendMode, StateBackend, WindowCount};
use crate::errors::{AppError, AppResult};

/// INCR and, when the key carries no TTL yet, start the window. Doing both in
/// one script keeps a key from living forever if the first EXPIRE is lost.
const INCR_WINDOW_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
local ttl = redis.call("TTL", KEYS[1])
if ttl < 0 then
    redis.call("EXPIRE", KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Redis-backed state. Source of truth across processes.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect and verify the server answers PING within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        Self::connect_client(client, timeout).await
    }

    pub async fn connect_client(client: redis::Client, timeout: Duration) -> AppResult<Self> {
        let connect = async {
            let conn = ConnectionManager::new(client).await?;
            let backend = Self { conn };
            backend.ping().await?;
            Ok::<_, AppError>(backend)
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StateUnavailable(format!(
                "redis connect timed out after {:?}",
                timeout
            ))),
        }
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl StateBackend for RedisBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> AppResult<WindowCount> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(INCR_WINDOW_SCRIPT);
        let (count, ttl): (u64, i64) = script
            .key(key)
            .arg(window_secs.max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(WindowCount {
            count,
            reset_secs: ttl.max(0) as u64,
        })
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Redis
    }
}
