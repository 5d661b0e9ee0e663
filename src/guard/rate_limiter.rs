use std::sync::Arc;

use serde_json::json;

use crate::audit::logger::{AuditLogger, AuditOptions, Severity};
use super::counter_store::{now_ms, CounterStore};

/// Fixed-window rate limiter over a swappable counter store.
///
/// Windows reset fully at their boundary, so a burst of `limit` requests at
/// the very end of a window followed by `limit` more at the start of the
/// next is accepted. That looseness is the documented tradeoff of the
/// fixed-window scheme, not a bug.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    audit: AuditLogger,
}

/// Actions with independent counters per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAction {
    /// 30 chat messages per minute
    Messages,
    /// 10 new conversations per hour
    Conversations,
    /// 10 file uploads per minute
    FileUploads,
    /// 100 API calls per minute
    ApiCalls,
    /// 5 login attempts per 15 minutes, keyed by (actor, source address)
    LoginAttempts,
}

impl RateLimitAction {
    /// Get the window size in milliseconds
    pub fn window_ms(&self) -> u64 {
        match self {
            RateLimitAction::Messages => 60_000,
            RateLimitAction::Conversations => 3_600_000, // 1 hour
            RateLimitAction::FileUploads => 60_000,
            RateLimitAction::ApiCalls => 60_000,
            RateLimitAction::LoginAttempts => 900_000, // 15 minutes
        }
    }

    /// Get the maximum allowed requests in the window
    pub fn max_requests(&self) -> u64 {
        match self {
            RateLimitAction::Messages => 30,
            RateLimitAction::Conversations => 10,
            RateLimitAction::FileUploads => 10,
            RateLimitAction::ApiCalls => 100,
            RateLimitAction::LoginAttempts => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Messages => "messages",
            RateLimitAction::Conversations => "conversations",
            RateLimitAction::FileUploads => "file_uploads",
            RateLimitAction::ApiCalls => "api_calls",
            RateLimitAction::LoginAttempts => "login_attempts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "messages" => Some(RateLimitAction::Messages),
            "conversations" => Some(RateLimitAction::Conversations),
            "file_uploads" => Some(RateLimitAction::FileUploads),
            "api_calls" => Some(RateLimitAction::ApiCalls),
            "login_attempts" => Some(RateLimitAction::LoginAttempts),
            _ => None,
        }
    }
}

/// Identifies one logical counter: (actor, action).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitKey {
    pub actor_id: String,
    pub action: RateLimitAction,
}

impl RateLimitKey {
    pub fn new(actor_id: &str, action: RateLimitAction) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action,
        }
    }

    pub fn storage_key(&self) -> String {
        format!("ratelimit:{}:{}", self.action.as_str(), self.actor_id)
    }

    /// KEYS pattern matching every counter of one actor.
    pub fn actor_pattern(actor_id: &str) -> String {
        format!("ratelimit:*:{}", actor_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at_ms: u64,
    /// Present iff the request was rejected.
    pub retry_after_secs: Option<u64>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    /// Check whether one more `action` by `actor_id` fits inside the
    /// current window, consuming one unit of quota.
    ///
    /// Never returns an error: a failing counter backend degrades to
    /// fail-open (request allowed, full limit reported) with a
    /// High-severity audit event, trading strictness for availability.
    pub async fn check(
        &self,
        actor_id: &str,
        action: RateLimitAction,
        limit: u64,
        window_ms: u64,
    ) -> RateLimitResult {
        let key = RateLimitKey::new(actor_id, action);

        let snapshot = match self.store.increment(&key, window_ms).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::counter!("guard_rate_limit_degraded_total", 1);
                eprintln!(
                    "Rate limit backend unavailable for {}: {} (failing open)",
                    key.storage_key(),
                    e
                );
                self.audit.log(
                    actor_id,
                    "rate_limit.degraded",
                    json!({
                        "action": action.as_str(),
                        "error": e.to_string(),
                        "policy": "fail_open",
                    }),
                    AuditOptions::severity(Severity::High),
                );
                return RateLimitResult {
                    allowed: true,
                    remaining: limit,
                    reset_at_ms: now_ms() + window_ms,
                    retry_after_secs: None,
                };
            }
        };

        let allowed = snapshot.count <= limit;
        let remaining = limit.saturating_sub(snapshot.count);

        if allowed {
            return RateLimitResult {
                allowed: true,
                remaining,
                reset_at_ms: snapshot.reset_at_ms,
                retry_after_secs: None,
            };
        }

        let now = now_ms();
        let retry_after_secs = snapshot.reset_at_ms.saturating_sub(now).div_ceil(1000).max(1);

        metrics::counter!("guard_rate_limit_rejections_total", 1, "action" => action.as_str());
        self.audit.log(
            actor_id,
            "rate_limit.rejected",
            json!({
                "action": action.as_str(),
                "limit": limit,
                "count": snapshot.count,
                "retry_after_secs": retry_after_secs,
            }),
            AuditOptions::severity(Severity::Medium),
        );

        RateLimitResult {
            allowed: false,
            remaining,
            reset_at_ms: snapshot.reset_at_ms,
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Chat messages: 30 per minute
    pub async fn check_message(&self, actor_id: &str) -> RateLimitResult {
        self.check_named(actor_id, RateLimitAction::Messages).await
    }

    /// New conversations: 10 per hour
    pub async fn check_conversation(&self, actor_id: &str) -> RateLimitResult {
        self.check_named(actor_id, RateLimitAction::Conversations).await
    }

    /// File uploads: 10 per minute
    pub async fn check_file_upload(&self, actor_id: &str) -> RateLimitResult {
        self.check_named(actor_id, RateLimitAction::FileUploads).await
    }

    /// API calls: 100 per minute
    pub async fn check_api_call(&self, actor_id: &str) -> RateLimitResult {
        self.check_named(actor_id, RateLimitAction::ApiCalls).await
    }

    /// Login attempts: 5 per 15 minutes. `composite_key` must be the salted
    /// (actor, source address) hash so lockouts scope to one address.
    pub async fn check_login(&self, composite_key: &str) -> RateLimitResult {
        self.check_named(composite_key, RateLimitAction::LoginAttempts).await
    }

    async fn check_named(&self, actor_id: &str, action: RateLimitAction) -> RateLimitResult {
        self.check(actor_id, action, action.max_requests(), action.window_ms())
            .await
    }

    /// True when any of the four named limits for this actor is exhausted.
    /// Reads counters without consuming quota (an aggregation gate that
    /// spent an increment per probe would throttle actors by looking at
    /// them).
    pub async fn is_actor_throttled(&self, actor_id: &str) -> bool {
        let actions = [
            RateLimitAction::Messages,
            RateLimitAction::Conversations,
            RateLimitAction::FileUploads,
            RateLimitAction::ApiCalls,
        ];

        for action in actions {
            let key = RateLimitKey::new(actor_id, action);
            match self.store.peek(&key).await {
                Ok(Some(snapshot)) if snapshot.count >= action.max_requests() => return true,
                Ok(_) => {}
                Err(e) => {
                    // Same fail-open stance as check(): an unreadable
                    // backend never reports an actor as locked.
                    metrics::counter!("guard_rate_limit_degraded_total", 1);
                    eprintln!("Throttle probe failed for {}: {}", actor_id, e);
                    return false;
                }
            }
        }

        false
    }

    /// Administrative override: drop one counter, or every counter for the
    /// actor when no action is given.
    pub async fn clear(&self, actor_id: &str, action: Option<RateLimitAction>) -> anyhow::Result<()> {
        match action {
            Some(action) => {
                self.store
                    .delete(&RateLimitKey::new(actor_id, action))
                    .await?
            }
            None => self.store.delete_by_actor(actor_id).await?,
        }

        self.audit.log(
            actor_id,
            "rate_limit.cleared",
            json!({ "action": action.map(|a| a.as_str()) }),
            AuditOptions::severity(Severity::Low),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::{AuditStore, MemoryAuditStore};
    use crate::guard::counter_store::{FailingCounterStore, MemoryCounterStore};

    fn limiter() -> (RateLimiter, Arc<MemoryAuditStore>) {
        let sink = Arc::new(MemoryAuditStore::new());
        let audit = AuditLogger::new(sink.clone());
        (RateLimiter::new(Arc::new(MemoryCounterStore::new()), audit), sink)
    }

    #[tokio::test]
    async fn test_window_correctness() {
        let (limiter, _) = limiter();
        let limit = 5u64;

        let mut last_remaining = limit;
        for i in 0..limit {
            let result = limiter
                .check("actor-1", RateLimitAction::Messages, limit, 60_000)
                .await;
            assert!(result.allowed, "request {} should be allowed", i + 1);
            assert!(
                result.remaining < last_remaining || i == 0,
                "remaining must strictly decrease"
            );
            assert_eq!(result.remaining, limit - i - 1);
            last_remaining = result.remaining;
        }

        let over = limiter
            .check("actor-1", RateLimitAction::Messages, limit, 60_000)
            .await;
        assert!(!over.allowed);
        assert_eq!(over.remaining, 0);
        assert!(over.retry_after_secs.unwrap() > 0);
        assert!(over.reset_at_ms > now_ms(), "window must still be live");
    }

    #[tokio::test]
    async fn test_conversation_limit_enforced() {
        let (limiter, _) = limiter();
        let max = RateLimitAction::Conversations.max_requests();

        for _ in 0..max {
            assert!(limiter.check_conversation("actor-1").await.allowed);
        }
        assert!(!limiter.check_conversation("actor-1").await.allowed);
    }

    #[tokio::test]
    async fn test_window_reset_restores_quota() {
        let (limiter, _) = limiter();
        let limit = 3u64;

        for _ in 0..limit + 2 {
            limiter
                .check("actor-1", RateLimitAction::Messages, limit, 10)
                .await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let result = limiter
            .check("actor-1", RateLimitAction::Messages, limit, 60_000)
            .await;
        assert!(result.allowed);
        assert_eq!(result.remaining, limit - 1);
    }

    #[tokio::test]
    async fn test_zero_limit_always_rejects() {
        let (limiter, _) = limiter();
        let result = limiter
            .check("actor-1", RateLimitAction::FileUploads, 0, 60_000)
            .await;
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
    }

    #[tokio::test]
    async fn test_fail_open_on_backend_error() {
        let sink = Arc::new(MemoryAuditStore::new());
        let audit = AuditLogger::new(sink.clone());
        let limiter = RateLimiter::new(Arc::new(FailingCounterStore), audit);

        let result = limiter
            .check("actor-1", RateLimitAction::Messages, 5, 60_000)
            .await;
        assert!(result.allowed, "backend failure must fail open");
        assert_eq!(result.remaining, 5, "degraded mode reports the full limit");
        assert!(result.retry_after_secs.is_none());

        // The degraded-enforcement event is written on a spawned task
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let page = sink
            .query(&crate::audit::store::AuditQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].action, "rate_limit.degraded");
        assert_eq!(page.entries[0].severity, Severity::High);
        assert_eq!(page.entries[0].actor_id, "actor-1");
        assert_eq!(page.entries[0].details["policy"], "fail_open");
    }

    #[tokio::test]
    async fn test_is_actor_throttled_aggregates_without_consuming() {
        let (limiter, _) = limiter();

        assert!(!limiter.is_actor_throttled("actor-1").await);

        // Exhaust the file-upload window
        let action = RateLimitAction::FileUploads;
        for _ in 0..action.max_requests() {
            limiter.check_file_upload("actor-1").await;
        }

        assert!(limiter.is_actor_throttled("actor-1").await);
        // Probing twice must not change the answer
        assert!(limiter.is_actor_throttled("actor-1").await);
        assert!(!limiter.is_actor_throttled("actor-2").await);
    }

    #[tokio::test]
    async fn test_clear_resets_consumed_window() {
        let (limiter, _) = limiter();
        let action = RateLimitAction::Messages;

        for _ in 0..action.max_requests() + 1 {
            limiter.check_message("actor-1").await;
        }
        assert!(!limiter.check_message("actor-1").await.allowed);

        limiter.clear("actor-1", Some(action)).await.unwrap();
        assert!(limiter.check_message("actor-1").await.allowed);
    }

    #[tokio::test]
    async fn test_login_keys_differ_per_source_address() {
        let (limiter, _) = limiter();
        let hasher = crate::guard::actor_key::ActorKeyHasher::new("secret".into());
        let key_a = hasher.generate("actor-1", "203.0.113.9");
        let key_b = hasher.generate("actor-1", "198.51.100.7");

        let max = RateLimitAction::LoginAttempts.max_requests();
        for _ in 0..max {
            limiter.check_login(&key_a).await;
        }
        assert!(!limiter.check_login(&key_a).await.allowed);
        // Same actor from another address is not locked out
        assert!(limiter.check_login(&key_b).await.allowed);
    }
}
