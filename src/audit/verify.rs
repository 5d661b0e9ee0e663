use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use super::logger::canonical_hash;
use super::store::AuditStore;

/// One entry whose stored hash no longer matches its stored fields -
/// the record was altered or corrupted after write.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityMismatch {
    pub id: String,
    pub stored_hash: String,
    pub computed_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub mismatches: Vec<IntegrityMismatch>,
}

/// Out-of-band batch check over the audit sink: re-fetch entries,
/// recompute each hash from the stored fields, report divergence as data.
/// Read-only - no entry is ever mutated, mismatch or not; remediation is
/// the operator's call.
#[derive(Clone)]
pub struct IntegrityVerifier {
    store: Arc<dyn AuditStore>,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Verify up to `n` of the most recent entries.
    pub async fn verify_batch(&self, n: usize) -> Result<IntegrityReport> {
        let entries = self.store.fetch_recent(n).await?;

        let mismatches: Vec<IntegrityMismatch> = entries
            .iter()
            .filter_map(|entry| {
                let computed = canonical_hash(
                    &entry.actor_id,
                    &entry.action,
                    &entry.details,
                    entry.timestamp.timestamp_millis(),
                );
                if computed == entry.integrity_hash {
                    None
                } else {
                    Some(IntegrityMismatch {
                        id: entry.id.clone(),
                        stored_hash: entry.integrity_hash.clone(),
                        computed_hash: computed,
                    })
                }
            })
            .collect();

        if !mismatches.is_empty() {
            metrics::counter!("guard_audit_integrity_mismatches_total", mismatches.len() as u64);
        }

        Ok(IntegrityReport {
            checked: entries.len(),
            mismatches,
        })
    }
}
