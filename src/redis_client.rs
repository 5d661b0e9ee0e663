use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use anyhow::{Context, Result};

/// Redis client wrapper for the counter backend and the audit sink.
/// Enforces secure connection requirements (password authentication for production)
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Create a new Redis client from a connection URL
    ///
    /// Security Requirements:
    /// - For production: Redis URL must include a password (redis://:password@host:port)
    /// - For local development: Password strongly recommended
    /// - Supports both plain (redis://) and encrypted (rediss://) connections
    pub async fn new(redis_url: &str) -> Result<Self> {
        if !redis_url.contains("://") {
            return Err(anyhow::anyhow!(
                "Invalid Redis URL format. Expected: redis://:password@host:port or rediss://:password@host:port"
            ));
        }

        let has_password = redis_url.contains('@');
        if !has_password {
            eprintln!("⚠️  WARNING: Redis URL does not include a password!");
            eprintln!("🔒 For production, always use: redis://:yourpassword@host:port");
        }

        let client = Client::open(redis_url)
            .context("Failed to create Redis client from URL")?;

        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager - check REDIS_URL and password")?;

        Ok(Self { manager })
    }

    /// Increment a counter and read back its remaining TTL in one atomic
    /// pipeline. Returns (count after increment, pttl in ms; negative when
    /// the key has no expiry yet).
    pub async fn incr_with_pttl(&self, key: &str) -> Result<(i64, i64), RedisError> {
        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
    }

    /// Set a millisecond expiry on a key
    pub async fn pexpire(&self, key: &str, ms: i64) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ms)
            .query_async(&mut conn)
            .await
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.get(key).await
    }

    /// Set a key to a string value (no expiry)
    pub async fn set(&self, key: &str, value: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.set(key, value).await
    }

    /// Get the remaining TTL of a key in milliseconds
    pub async fn pttl(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PTTL").arg(key).query_async(&mut conn).await
    }

    /// Delete one or more keys, returning the number removed
    pub async fn del(&self, keys: &[String]) -> Result<i64, RedisError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        conn.del(keys).await
    }

    /// Get all keys matching a pattern
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
    }

    /// Add an element to a sorted set with a score
    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score).await
    }

    /// Get members of a sorted set within a score range (ascending)
    pub async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.zrangebyscore(key, min, max).await
    }

    /// Get the most recent members of a sorted set (highest scores first)
    pub async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
    }

    /// Remove members of a sorted set within a score range
    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zrembyscore(key, min, max).await
    }

    /// Ping Redis to check if connection is alive
    pub async fn ping(&self) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|resp| resp == "PONG")
    }
}
