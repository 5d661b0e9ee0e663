use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::redact::redact_value;
use super::store::{AuditEntry, AuditPage, AuditQuery, AuditStore};

pub use super::store::Severity;

/// Optional fields attached to an audit event.
#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub target_user_id: Option<String>,
    pub severity: Option<Severity>,
}

impl AuditOptions {
    pub fn severity(severity: Severity) -> Self {
        Self {
            severity: Some(severity),
            ..Default::default()
        }
    }

    pub fn conversation(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }

    pub fn message(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    pub fn target_user(mut self, target_user_id: &str) -> Self {
        self.target_user_id = Some(target_user_id.to_string());
        self
    }
}

/// Exported entry set for one actor (compliance/portability requests).
#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub actor_id: String,
    pub generated_at: DateTime<Utc>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub entries: Vec<AuditEntry>,
}

/// Render a JSON value with recursively sorted object keys, so the hash
/// input does not depend on map insertion order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        leaf => leaf.to_string(),
    }
}

/// Hash over the canonical payload of an entry's stored fields. Computed
/// once at write time over the redacted details; recomputed by the
/// verifier to detect post-write modification.
pub fn canonical_hash(actor_id: &str, action: &str, details: &Value, timestamp_ms: i64) -> String {
    let payload = format!(
        "{}|{}|{}|{}",
        actor_id,
        action,
        canonical_json(details),
        timestamp_ms
    );
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Writes tamper-evident entries to the audit sink. The only writer to
/// the sink; ContentSanitizer/SpamDetector/RateLimiter outcomes all land
/// here.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Fire-and-forget append. Never blocks the caller on the sink write
    /// and never surfaces an error to the triggering request: a failed
    /// write increments `guard_audit_write_failures_total` and prints one
    /// line for the operator.
    pub fn log(&self, actor_id: &str, action: &str, details: Value, opts: AuditOptions) {
        let logger = self.clone();
        let actor_id = actor_id.to_string();
        let action = action.to_string();

        tokio::spawn(async move {
            if let Err(e) = logger.append(&actor_id, &action, details, opts).await {
                metrics::counter!("guard_audit_write_failures_total", 1);
                eprintln!("Audit write failed for action {}: {}", action, e);
            }
        });
    }

    /// Build and persist one entry. The explicit, testable path behind
    /// [`AuditLogger::log`].
    pub async fn append(
        &self,
        actor_id: &str,
        action: &str,
        details: Value,
        opts: AuditOptions,
    ) -> Result<AuditEntry> {
        let entry = build_entry(actor_id, action, details, opts);
        self.store.append(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        self.store.query(query).await
    }

    /// Full entry set for one actor, oldest-first.
    pub async fn export_for_actor(
        &self,
        actor_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<ExportBundle> {
        let page = self
            .store
            .query(&AuditQuery {
                actor_id: Some(actor_id.to_string()),
                from,
                to,
                oldest_first: true,
                limit: Some(usize::MAX),
                ..Default::default()
            })
            .await?;

        Ok(ExportBundle {
            actor_id: actor_id.to_string(),
            generated_at: Utc::now(),
            from,
            to,
            entries: page.entries,
        })
    }

    /// Delete entries past retention; returns the count removed.
    pub async fn cleanup_older_than(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        self.store.delete_older_than(cutoff).await
    }
}

/// Redact, timestamp, and hash one entry. Redaction runs before hashing:
/// the hash covers what is persisted, not what was submitted.
fn build_entry(actor_id: &str, action: &str, details: Value, opts: AuditOptions) -> AuditEntry {
    let timestamp = Utc::now();
    let redacted = redact_value(&details);
    let integrity_hash = canonical_hash(actor_id, action, &redacted, timestamp.timestamp_millis());

    AuditEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp,
        actor_id: actor_id.to_string(),
        action: action.to_string(),
        conversation_id: opts.conversation_id,
        message_id: opts.message_id,
        target_user_id: opts.target_user_id,
        details: redacted,
        severity: opts.severity.unwrap_or(Severity::Low),
        integrity_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::redact::CARD_TOKEN;
    use crate::audit::store::{FailingAuditStore, MemoryAuditStore};
    use serde_json::json;

    #[test]
    fn test_canonical_hash_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(
            canonical_hash("actor", "act", &a, 42),
            canonical_hash("actor", "act", &b, 42)
        );
    }

    #[test]
    fn test_canonical_hash_changes_with_any_field() {
        let details = json!({"k": "v"});
        let base = canonical_hash("actor", "act", &details, 42);
        assert_ne!(base, canonical_hash("actor2", "act", &details, 42));
        assert_ne!(base, canonical_hash("actor", "act2", &details, 42));
        assert_ne!(base, canonical_hash("actor", "act", &json!({"k": "w"}), 42));
        assert_ne!(base, canonical_hash("actor", "act", &details, 43));
    }

    #[tokio::test]
    async fn test_append_redacts_before_hashing() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = AuditLogger::new(store.clone());

        let entry = logger
            .append(
                "actor-1",
                "moderation.note",
                json!({"note": "card 4111111111111111"}),
                AuditOptions::default(),
            )
            .await
            .unwrap();

        let note = entry.details["note"].as_str().unwrap();
        assert!(note.contains(CARD_TOKEN));
        assert!(!note.contains("4111111111111111"));

        // Hash covers the redacted value
        let recomputed = canonical_hash(
            &entry.actor_id,
            &entry.action,
            &entry.details,
            entry.timestamp.timestamp_millis(),
        );
        assert_eq!(recomputed, entry.integrity_hash);
    }

    #[tokio::test]
    async fn test_log_swallows_sink_failure() {
        let logger = AuditLogger::new(Arc::new(FailingAuditStore));
        // Must not panic or propagate anything
        logger.log("actor-1", "x", json!({}), AuditOptions::default());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_export_is_oldest_first_and_scoped() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = AuditLogger::new(store);

        logger
            .append("a", "first", json!({}), AuditOptions::default())
            .await
            .unwrap();
        logger
            .append("a", "second", json!({}), AuditOptions::default())
            .await
            .unwrap();
        logger
            .append("b", "other", json!({}), AuditOptions::default())
            .await
            .unwrap();

        let bundle = logger.export_for_actor("a", None, None).await.unwrap();
        assert_eq!(bundle.entries.len(), 2);
        assert_eq!(bundle.entries[0].action, "first");
        assert_eq!(bundle.entries[1].action, "second");
    }

    #[tokio::test]
    async fn test_options_attach_resource_refs() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = AuditLogger::new(store);

        let entry = logger
            .append(
                "a",
                "moderation.flag",
                json!({}),
                AuditOptions::severity(Severity::High)
                    .conversation("conv-9")
                    .message("msg-3")
                    .target_user("traveller-2"),
            )
            .await
            .unwrap();

        assert_eq!(entry.severity, Severity::High);
        assert_eq!(entry.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(entry.message_id.as_deref(), Some("msg-3"));
        assert_eq!(entry.target_user_id.as_deref(), Some("traveller-2"));
    }
}
