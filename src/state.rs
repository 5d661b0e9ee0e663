use std::sync::Arc;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::audit::store::{AuditStore, MemoryAuditStore, RedisAuditStore};
use crate::audit::{AuditLogger, IntegrityVerifier};
use crate::config::Config;
use crate::guard::counter_store::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::guard::{ActorKeyHasher, ContentSanitizer, RateLimiter, SpamDetector};
use crate::redis_client::RedisClient;

/// Shared application state. Backend selection happens once here at
/// startup: with REDIS_URL set both the counters and the audit sink run
/// on Redis, otherwise everything is process-local memory.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub redis: Option<RedisClient>,
    pub rate_limiter: RateLimiter,
    pub sanitizer: ContentSanitizer,
    pub spam_detector: SpamDetector,
    pub audit: AuditLogger,
    pub verifier: IntegrityVerifier,
    pub key_hasher: ActorKeyHasher,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub async fn new(config: Config, metrics_handle: PrometheusHandle) -> Result<Self> {
        let redis = match &config.redis_url {
            Some(url) => {
                let client = RedisClient::new(url).await?;
                println!("✅ Connected to Redis");
                Some(client)
            }
            None => {
                println!("⚠️  REDIS_URL not set - using in-memory guard backend");
                None
            }
        };

        let (counter_store, audit_store): (Arc<dyn CounterStore>, Arc<dyn AuditStore>) =
            match &redis {
                Some(client) => (
                    Arc::new(RedisCounterStore::new(client.clone())),
                    Arc::new(RedisAuditStore::new(client.clone())),
                ),
                None => (
                    Arc::new(MemoryCounterStore::new()),
                    Arc::new(MemoryAuditStore::new()),
                ),
            };

        let audit = AuditLogger::new(audit_store.clone());

        Ok(Self {
            rate_limiter: RateLimiter::new(counter_store, audit.clone()),
            sanitizer: ContentSanitizer::new(&config.profanity_words),
            spam_detector: SpamDetector::new(),
            verifier: IntegrityVerifier::new(audit_store),
            key_hasher: ActorKeyHasher::new(config.server_secret.clone()),
            audit,
            redis,
            config,
            metrics_handle,
        })
    }
}
