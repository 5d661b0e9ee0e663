use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditQuery, Severity};

/// User-visible rate-limit rejection payload (HTTP 429).
#[derive(Debug, Serialize)]
pub struct RateLimitError {
    pub error: String,
    pub message: String,
    pub retry_after_seconds: u64,
}

impl RateLimitError {
    pub fn new(retry_after_seconds: u64) -> Self {
        Self {
            error: "rate_limit_exceeded".to_string(),
            message: format!(
                "Please wait {} seconds before trying again",
                retry_after_seconds
            ),
            retry_after_seconds,
        }
    }
}

/// User-visible content rejection payload (HTTP 400). Only hard input
/// violations produce this; security signals never do.
#[derive(Debug, Serialize)]
pub struct ContentRejectedError {
    pub error: String,
    pub reason: String,
}

impl ContentRejectedError {
    pub fn new(reason: String) -> Self {
        Self {
            error: "content_rejected".to_string(),
            reason,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub conversation_id: Option<String>,
    pub message: String,
    /// Recent messages of this conversation, supplied and bounded by the
    /// caller, for the spam heuristics.
    #[serde(default)]
    pub recent_messages: Vec<String>,
}

/// Response for an accepted message. Carries only the cleaned text -
/// pattern warnings and spam flags are deliberately not echoed back to
/// the sender.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Accepted outcome of a single named limit check (login, conversation).
#[derive(Debug, Serialize)]
pub struct LimitCheckResponse {
    pub allowed: bool,
    pub remaining: u64,
    /// When the current window expires (unix millis).
    pub reset_at_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ThrottleStatus {
    pub actor_id: String,
    pub throttled: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearLimitsResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub retention_days: u32,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub batch: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Query-string shape for `GET /admin/audit`, converted into an
/// [`AuditQuery`].
#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub actor_id: Option<String>,
    pub conversation_id: Option<String>,
    pub action: Option<String>,
    pub severity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    #[serde(default)]
    pub oldest_first: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditQueryParams {
    /// `Err` carries the name of the parameter that failed to parse.
    pub fn into_query(self) -> Result<AuditQuery, &'static str> {
        let severity = match self.severity.as_deref() {
            Some(raw) => Some(Severity::parse(raw).ok_or("severity")?),
            None => None,
        };

        Ok(AuditQuery {
            actor_id: self.actor_id,
            conversation_id: self.conversation_id,
            action: self.action,
            severity,
            from: self.from,
            to: self.to,
            search: self.search,
            oldest_first: self.oldest_first,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_query_params_parse_severity() {
        let params = AuditQueryParams {
            severity: Some("high".to_string()),
            ..Default::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.severity, Some(Severity::High));

        let bad = AuditQueryParams {
            severity: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(bad.into_query().is_err());
    }

    #[test]
    fn test_rate_limit_error_message_includes_wait() {
        let err = RateLimitError::new(42);
        assert_eq!(err.retry_after_seconds, 42);
        assert!(err.message.contains("42 seconds"));
    }
}
