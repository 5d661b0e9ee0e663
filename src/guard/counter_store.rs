use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::redis_client::RedisClient;
use super::rate_limiter::RateLimitKey;

/// Budget for one round trip to the networked counter backend. A slow or
/// unreachable backend must fail fast so the limiter can apply its
/// fail-open policy instead of stalling the request.
const COUNTER_TIMEOUT_MS: u64 = 150;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// State of one fixed-window counter after an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests observed in the current window, including this one.
    pub count: u64,
    /// When the current window expires (unix millis).
    pub reset_at_ms: u64,
}

/// Key/value counter with per-window TTL. Two implementations: a Redis
/// backend and a process-local fallback. Selected once at startup; call
/// sites never branch on which one they got.
///
/// A backend error surfaces to the RateLimiter, which decides policy.
/// The store never falls back from Redis to memory mid-flight - split
/// counts are worse than a degraded window.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, starting a fresh window of
    /// `window_ms` on the first hit.
    async fn increment(&self, key: &RateLimitKey, window_ms: u64) -> Result<WindowSnapshot>;

    /// Read the live counter for `key` without consuming quota.
    /// Returns `None` when no window is live.
    async fn peek(&self, key: &RateLimitKey) -> Result<Option<WindowSnapshot>>;

    /// Drop the counter for one key.
    async fn delete(&self, key: &RateLimitKey) -> Result<()>;

    /// Drop every counter belonging to an actor.
    async fn delete_by_actor(&self, actor_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedisCounterStore {
    redis: RedisClient,
}

impl RedisCounterStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

async fn with_timeout<T, F>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T, redis::RedisError>>,
{
    tokio::time::timeout(Duration::from_millis(COUNTER_TIMEOUT_MS), fut)
        .await
        .map_err(|_| anyhow!("counter backend timed out after {}ms", COUNTER_TIMEOUT_MS))?
        .map_err(|e| anyhow!("counter backend error: {}", e))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &RateLimitKey, window_ms: u64) -> Result<WindowSnapshot> {
        let storage_key = key.storage_key();
        let now = now_ms();

        // INCR + PTTL run as one atomic pipeline, so concurrent increments
        // never under-count. A negative PTTL means this increment opened a
        // fresh window and the expiry still has to be set.
        let (count, pttl) = with_timeout(self.redis.incr_with_pttl(&storage_key)).await?;

        let reset_at_ms = if pttl < 0 {
            with_timeout(self.redis.pexpire(&storage_key, window_ms as i64)).await?;
            now + window_ms
        } else {
            now + pttl as u64
        };

        Ok(WindowSnapshot {
            count: count.max(0) as u64,
            reset_at_ms,
        })
    }

    async fn peek(&self, key: &RateLimitKey) -> Result<Option<WindowSnapshot>> {
        let storage_key = key.storage_key();

        let value = with_timeout(self.redis.get(&storage_key)).await?;
        let Some(raw) = value else {
            return Ok(None);
        };

        let pttl = with_timeout(self.redis.pttl(&storage_key)).await?;
        if pttl <= 0 {
            // Key exists without a live expiry; treat as not counting.
            return Ok(None);
        }

        let count = raw
            .parse::<u64>()
            .map_err(|e| anyhow!("counter value corrupted for {}: {}", storage_key, e))?;

        Ok(Some(WindowSnapshot {
            count,
            reset_at_ms: now_ms() + pttl as u64,
        }))
    }

    async fn delete(&self, key: &RateLimitKey) -> Result<()> {
        with_timeout(self.redis.del(&[key.storage_key()])).await?;
        Ok(())
    }

    async fn delete_by_actor(&self, actor_id: &str) -> Result<()> {
        let pattern = RateLimitKey::actor_pattern(actor_id);
        let keys = with_timeout(self.redis.keys(&pattern)).await?;
        with_timeout(self.redis.del(&keys)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory fallback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    reset_at_ms: u64,
}

/// Process-local counter map used when no Redis backend is configured.
/// A single mutex guards the map; contention here is low and the critical
/// section is a hash lookup.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    counters: Arc<Mutex<HashMap<String, WindowCounter>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &RateLimitKey, window_ms: u64) -> Result<WindowSnapshot> {
        let now = now_ms();
        let mut counters = self.counters.lock().unwrap();

        let entry = counters
            .entry(key.storage_key())
            .and_modify(|c| {
                if now >= c.reset_at_ms {
                    // Lazy fixed-window reset: the expired counter is
                    // replaced, not incremented.
                    c.count = 1;
                    c.reset_at_ms = now + window_ms;
                } else {
                    c.count += 1;
                }
            })
            .or_insert(WindowCounter {
                count: 1,
                reset_at_ms: now + window_ms,
            });

        Ok(WindowSnapshot {
            count: entry.count,
            reset_at_ms: entry.reset_at_ms,
        })
    }

    async fn peek(&self, key: &RateLimitKey) -> Result<Option<WindowSnapshot>> {
        let now = now_ms();
        let counters = self.counters.lock().unwrap();

        Ok(counters.get(&key.storage_key()).and_then(|c| {
            if now >= c.reset_at_ms {
                None
            } else {
                Some(WindowSnapshot {
                    count: c.count,
                    reset_at_ms: c.reset_at_ms,
                })
            }
        }))
    }

    async fn delete(&self, key: &RateLimitKey) -> Result<()> {
        self.counters.lock().unwrap().remove(&key.storage_key());
        Ok(())
    }

    async fn delete_by_actor(&self, actor_id: &str) -> Result<()> {
        let suffix = format!(":{}", actor_id);
        self.counters
            .lock()
            .unwrap()
            .retain(|k, _| !k.ends_with(&suffix));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fault-injection fake for failure-policy tests
// ---------------------------------------------------------------------------

/// Counter store whose every call errors, simulating a dead backend.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct FailingCounterStore;

#[cfg(test)]
#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn increment(&self, _key: &RateLimitKey, _window_ms: u64) -> Result<WindowSnapshot> {
        Err(anyhow!("connection refused"))
    }

    async fn peek(&self, _key: &RateLimitKey) -> Result<Option<WindowSnapshot>> {
        Err(anyhow!("connection refused"))
    }

    async fn delete(&self, _key: &RateLimitKey) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn delete_by_actor(&self, _actor_id: &str) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::rate_limiter::RateLimitAction;

    fn key(actor: &str, action: RateLimitAction) -> RateLimitKey {
        RateLimitKey::new(actor, action)
    }

    #[tokio::test]
    async fn test_memory_increment_counts_up() {
        let store = MemoryCounterStore::new();
        let k = key("actor-1", RateLimitAction::Messages);

        let first = store.increment(&k, 60_000).await.unwrap();
        let second = store.increment(&k, 60_000).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(first.reset_at_ms, second.reset_at_ms);
    }

    #[tokio::test]
    async fn test_memory_window_expiry_resets_count() {
        let store = MemoryCounterStore::new();
        let k = key("actor-1", RateLimitAction::Messages);

        // 1ms window so it expires immediately
        store.increment(&k, 1).await.unwrap();
        store.increment(&k, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let snapshot = store.increment(&k, 60_000).await.unwrap();
        assert_eq!(snapshot.count, 1, "expired window must restart at 1");
    }

    #[tokio::test]
    async fn test_memory_peek_does_not_consume() {
        let store = MemoryCounterStore::new();
        let k = key("actor-1", RateLimitAction::ApiCalls);

        assert!(store.peek(&k).await.unwrap().is_none());
        store.increment(&k, 60_000).await.unwrap();

        let peeked = store.peek(&k).await.unwrap().unwrap();
        assert_eq!(peeked.count, 1);
        let peeked_again = store.peek(&k).await.unwrap().unwrap();
        assert_eq!(peeked_again.count, 1);
    }

    #[tokio::test]
    async fn test_memory_peek_hides_expired_window() {
        let store = MemoryCounterStore::new();
        let k = key("actor-1", RateLimitAction::Messages);

        store.increment(&k, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(store.peek(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_delete_by_actor_scopes_to_actor() {
        let store = MemoryCounterStore::new();
        let a1_msgs = key("actor-1", RateLimitAction::Messages);
        let a1_api = key("actor-1", RateLimitAction::ApiCalls);
        let a2_msgs = key("actor-2", RateLimitAction::Messages);

        store.increment(&a1_msgs, 60_000).await.unwrap();
        store.increment(&a1_api, 60_000).await.unwrap();
        store.increment(&a2_msgs, 60_000).await.unwrap();

        store.delete_by_actor("actor-1").await.unwrap();

        assert!(store.peek(&a1_msgs).await.unwrap().is_none());
        assert!(store.peek(&a1_api).await.unwrap().is_none());
        assert!(store.peek(&a2_msgs).await.unwrap().is_some());
    }
}
