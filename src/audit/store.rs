use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::redis_client::RedisClient;

const ENTRY_KEY_PREFIX: &str = "audit:entry:";
const INDEX_KEY: &str = "audit:index";

/// Severity of a security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// One tamper-evident audit record. Immutable once persisted: no updates,
/// ever - a divergent `integrity_hash` on re-read means the stored fields
/// were altered after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    /// Already redacted before hashing and persistence.
    pub details: Value,
    pub severity: Severity,
    pub integrity_hash: String,
}

/// Filter for querying the audit sink. Newest-first unless `oldest_first`
/// is set (export mode).
#[derive(Debug, Clone, Deserialize)]
pub struct AuditQuery {
    pub actor_id: Option<String>,
    pub conversation_id: Option<String>,
    pub action: Option<String>,
    pub severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Free-text search across action, actor id, and details.
    pub search: Option<String>,
    #[serde(default)]
    pub oldest_first: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            actor_id: None,
            conversation_id: None,
            action: None,
            severity: None,
            from: None,
            to: None,
            search: None,
            oldest_first: false,
            limit: None,
            offset: None,
        }
    }
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: usize = 50;

    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor_id) = &self.actor_id {
            if entry.actor_id != *actor_id {
                return false;
            }
        }
        if let Some(conversation_id) = &self.conversation_id {
            if entry.conversation_id.as_deref() != Some(conversation_id.as_str()) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if entry.action != *action {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity != severity {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let haystack = format!(
                "{} {} {}",
                entry.action.to_lowercase(),
                entry.actor_id.to_lowercase(),
                entry.details.to_string().to_lowercase()
            );
            if !haystack.contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

fn paginate(mut matched: Vec<AuditEntry>, query: &AuditQuery) -> AuditPage {
    if query.oldest_first {
        matched.sort_by_key(|e| e.timestamp);
    } else {
        matched.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
    }

    let total = matched.len();
    let limit = query.limit.unwrap_or(AuditQuery::DEFAULT_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let entries = matched.into_iter().skip(offset).take(limit).collect();

    AuditPage {
        entries,
        total,
        limit,
        offset,
    }
}

/// Append-only audit sink. The AuditLogger is the only writer; the
/// verifier and query surface only read. `delete_older_than` exists solely
/// for the retention sweep.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage>;

    /// Up to `n` most recent entries, for integrity verification.
    async fn fetch_recent(&self, n: usize) -> Result<Vec<AuditEntry>>;

    /// Remove entries older than the cutoff, returning how many.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// In-memory sink (tests and store-less deployments)
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored details of one entry in place, bypassing the
    /// append-only contract. Exists only to simulate post-write tampering.
    #[cfg(test)]
    pub fn tamper_details(&self, id: &str, details: Value) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.details = details;
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().unwrap().push(entry);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        let matched: Vec<AuditEntry> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        Ok(paginate(matched, query))
    }

    async fn fetch_recent(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self.entries.read().unwrap().clone();
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        entries.truncate(n);
        Ok(entries)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok(before - entries.len())
    }
}

// ---------------------------------------------------------------------------
// Redis sink
// ---------------------------------------------------------------------------

/// Audit sink on Redis: one JSON value per entry plus a sorted-set index
/// scored by timestamp millis. Entries carry no TTL - retention is an
/// explicit sweep, not an expiry.
#[derive(Clone)]
pub struct RedisAuditStore {
    redis: RedisClient,
}

impl RedisAuditStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn entry_key(id: &str) -> String {
        format!("{}{}", ENTRY_KEY_PREFIX, id)
    }

    async fn load_by_ids(&self, ids: &[String]) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(json) = self
                .redis
                .get(&Self::entry_key(id))
                .await
                .map_err(|e| anyhow!("audit sink read failed: {}", e))?
            {
                match serde_json::from_str::<AuditEntry>(&json) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => eprintln!("Skipping undecodable audit entry {}: {}", id, e),
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl AuditStore for RedisAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let json = serde_json::to_string(&entry)?;
        self.redis
            .set(&Self::entry_key(&entry.id), &json)
            .await
            .map_err(|e| anyhow!("audit sink write failed: {}", e))?;
        self.redis
            .zadd(INDEX_KEY, entry.timestamp.timestamp_millis() as f64, &entry.id)
            .await
            .map_err(|e| anyhow!("audit index write failed: {}", e))?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        // Narrow by the index where a date range is given, then filter the
        // decoded entries in-process.
        let min = query.from.map_or(f64::MIN, |t| t.timestamp_millis() as f64);
        let max = query.to.map_or(f64::MAX, |t| t.timestamp_millis() as f64);
        let ids = self
            .redis
            .zrangebyscore(INDEX_KEY, min, max)
            .await
            .map_err(|e| anyhow!("audit index read failed: {}", e))?;

        let matched: Vec<AuditEntry> = self
            .load_by_ids(&ids)
            .await?
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();
        Ok(paginate(matched, query))
    }

    async fn fetch_recent(&self, n: usize) -> Result<Vec<AuditEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .redis
            .zrevrange(INDEX_KEY, 0, n as isize - 1)
            .await
            .map_err(|e| anyhow!("audit index read failed: {}", e))?;
        self.load_by_ids(&ids).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_ms = cutoff.timestamp_millis() as f64;
        let ids = self
            .redis
            .zrangebyscore(INDEX_KEY, f64::MIN, cutoff_ms)
            .await
            .map_err(|e| anyhow!("audit index read failed: {}", e))?;

        let keys: Vec<String> = ids.iter().map(|id| Self::entry_key(id)).collect();
        let removed = self
            .redis
            .del(&keys)
            .await
            .map_err(|e| anyhow!("audit sink delete failed: {}", e))?;
        self.redis
            .zremrangebyscore(INDEX_KEY, f64::MIN, cutoff_ms)
            .await
            .map_err(|e| anyhow!("audit index delete failed: {}", e))?;

        Ok(removed.max(0) as usize)
    }
}

// ---------------------------------------------------------------------------
// Fault-injection fake for the swallowed-failure contract
// ---------------------------------------------------------------------------

/// Audit sink whose writes always fail, for testing that logging failures
/// never reach the request path.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct FailingAuditStore;

#[cfg(test)]
#[async_trait]
impl AuditStore for FailingAuditStore {
    async fn append(&self, _entry: AuditEntry) -> Result<()> {
        Err(anyhow!("sink unavailable"))
    }

    async fn query(&self, _query: &AuditQuery) -> Result<AuditPage> {
        Err(anyhow!("sink unavailable"))
    }

    async fn fetch_recent(&self, _n: usize) -> Result<Vec<AuditEntry>> {
        Err(anyhow!("sink unavailable"))
    }

    async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Err(anyhow!("sink unavailable"))
    }
}
