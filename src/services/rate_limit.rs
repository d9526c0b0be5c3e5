use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const KEY_PREFIX: &str = "mirror_tryout:ratelimit";

/// Fixed-window request limiter keyed by client identifier.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `key`; `Ok(false)` once the window is exhausted.
    async fn check(&self, key: &str) -> Result<bool, RateLimitError>;

    /// Backend connectivity (for health checks).
    async fn health_check(&self) -> Result<(), RateLimitError>;

    fn backend(&self) -> &'static str;
}

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Process-local limiter. Expired windows are pruned as requests arrive.
pub struct MemoryRateLimiter {
    max_requests: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<bool, RateLimitError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        entries.retain(|_, w| now < w.reset_at);

        let window = entries.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });
        if window.count >= self.max_requests {
            return Ok(false);
        }
        window.count += 1;
        Ok(true)
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, key: &str) -> Result<bool, RateLimitError> {
        self.check_at(key, Instant::now())
    }

    async fn health_check(&self) -> Result<(), RateLimitError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed limiter shared by every API replica (`INCR` + `EXPIRE`).
pub struct RedisRateLimiter {
    client: redis::Client,
    max_requests: u32,
    window: Duration,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str, max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url).map_err(RateLimitError::Redis)?;
        Ok(Self {
            client,
            max_requests,
            window,
        })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str) -> Result<bool, RateLimitError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(RateLimitError::Redis)?;
        let redis_key = format!("{KEY_PREFIX}:{key}");

        let count: u64 = conn.incr(&redis_key, 1).await.map_err(RateLimitError::Redis)?;
        if count == 1 {
            let ttl = self.window.as_secs().max(1) as i64;
            conn.expire::<_, ()>(&redis_key, ttl)
                .await
                .map_err(RateLimitError::Redis)?;
        }
        Ok(count <= u64::from(self.max_requests))
    }

    async fn health_check(&self) -> Result<(), RateLimitError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(RateLimitError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(RateLimitError::Redis)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Rate limiter unavailable: {0}")]
    Backend(String),
}
