use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;

use crate::audit::{AuditOptions, Severity};
use crate::guard::middleware::ActorContext;
use crate::guard::rate_limiter::RateLimitAction;
use crate::guard::sanitizer::validate_user_input;
use crate::models::{
    AuditQueryParams, CleanupRequest, CleanupResponse, ClearLimitsResponse, ContentRejectedError,
    ExportRangeParams, LimitCheckResponse, MessageResponse, PostMessageRequest, RateLimitError,
    ThrottleStatus, VerifyRequest,
};
use crate::state::AppState;
use std::collections::HashMap;

fn too_many_requests(retry_after_secs: Option<u64>) -> axum::response::Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!(RateLimitError::new(retry_after_secs.unwrap_or(1)))),
    )
        .into_response()
}

/// Guard pipeline for an outbound message: rate limit, sanitize, scan.
/// Security signals (pattern warnings, profanity, spam) are logged but
/// never echoed back - the sender only ever sees the cleaned text.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<ActorContext>,
    Json(req): Json<PostMessageRequest>,
) -> axum::response::Response {
    // Structured fields go through the strict gate before anything else
    if let Some(conversation_id) = &req.conversation_id {
        if !validate_user_input(&json!(conversation_id)) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!(ContentRejectedError::new(
                    "Invalid conversation id".to_string()
                ))),
            )
                .into_response();
        }
    }

    let limit = state.rate_limiter.check_message(&ctx.actor_id).await;
    if !limit.allowed {
        return too_many_requests(limit.retry_after_secs);
    }

    let outcome = state.sanitizer.sanitize(&req.message);
    if outcome.rejected {
        let reason = outcome
            .rejection_reason
            .unwrap_or_else(|| "Message rejected".to_string());
        state.audit.log(
            &ctx.actor_id,
            "content.rejected",
            json!({ "reason": reason.clone() }),
            message_opts(&req, Severity::Medium),
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(json!(ContentRejectedError::new(reason))),
        )
            .into_response();
    }

    if !outcome.warnings.is_empty() {
        metrics::counter!("guard_suspicious_patterns_total", outcome.warnings.len() as u64);
        state.audit.log(
            &ctx.actor_id,
            "content.suspicious_pattern",
            json!({ "patterns": outcome.warnings }),
            message_opts(&req, Severity::Medium),
        );
    }

    if outcome.profanity {
        state.audit.log(
            &ctx.actor_id,
            "content.profanity",
            json!({}),
            message_opts(&req, Severity::Low),
        );
    }

    if state.spam_detector.is_spam(&req.recent_messages, &ctx.actor_id) {
        metrics::counter!("guard_spam_flags_total", 1);
        state.audit.log(
            &ctx.actor_id,
            "spam.flagged",
            json!({ "recent_messages": req.recent_messages.len() }),
            message_opts(&req, Severity::Medium),
        );
    }

    Json(MessageResponse {
        message: outcome.cleaned,
    })
    .into_response()
}

fn message_opts(req: &PostMessageRequest, severity: Severity) -> AuditOptions {
    let opts = AuditOptions::severity(severity);
    match &req.conversation_id {
        Some(id) => opts.conversation(id),
        None => opts,
    }
}

/// Login-attempt gate. The counter key is the salted (actor, source
/// address) hash, so a lockout reached from one address never locks the
/// actor out elsewhere.
pub async fn login_check(
    State(state): State<AppState>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Response {
    let composite = state.key_hasher.generate(&ctx.actor_id, &ctx.source_addr);
    let result = state.rate_limiter.check_login(&composite).await;

    if !result.allowed {
        return too_many_requests(result.retry_after_secs);
    }

    Json(LimitCheckResponse {
        allowed: true,
        remaining: result.remaining,
        reset_at_ms: result.reset_at_ms,
    })
    .into_response()
}

/// Conversation-creation gate: 10 new conversations per actor per hour.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Response {
    let result = state.rate_limiter.check_conversation(&ctx.actor_id).await;

    if !result.allowed {
        return too_many_requests(result.retry_after_secs);
    }

    Json(LimitCheckResponse {
        allowed: true,
        remaining: result.remaining,
        reset_at_ms: result.reset_at_ms,
    })
    .into_response()
}

pub async fn throttle_status(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
) -> Json<ThrottleStatus> {
    let throttled = state.rate_limiter.is_actor_throttled(&actor_id).await;
    Json(ThrottleStatus {
        actor_id,
        throttled,
    })
}

/// Admin override: clear one counter (`?action=messages`) or every counter
/// for the actor.
pub async fn clear_limits(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let action = match params.get("action") {
        Some(raw) => match RateLimitAction::parse(raw) {
            Some(action) => Some(action),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Unknown rate limit action: {}", raw) })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    match state.rate_limiter.clear(&actor_id, action).await {
        Ok(()) => Json(ClearLimitsResponse { success: true }).into_response(),
        Err(e) => {
            eprintln!("Failed to clear limits for {}: {}", actor_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to clear limits" })),
            )
                .into_response()
        }
    }
}

pub async fn query_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> axum::response::Response {
    let query = match params.into_query() {
        Ok(query) => query,
        Err(param) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid query parameter: {}", param) })),
            )
                .into_response();
        }
    };

    match state.audit.query(&query).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            eprintln!("Audit query failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Audit query failed" })),
            )
                .into_response()
        }
    }
}

pub async fn export_audit(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
    Query(range): Query<ExportRangeParams>,
) -> axum::response::Response {
    match state
        .audit
        .export_for_actor(&actor_id, range.from, range.to)
        .await
    {
        Ok(bundle) => Json(bundle).into_response(),
        Err(e) => {
            eprintln!("Audit export failed for {}: {}", actor_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Audit export failed" })),
            )
                .into_response()
        }
    }
}

pub async fn cleanup_audit(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> axum::response::Response {
    match state.audit.cleanup_older_than(req.retention_days).await {
        Ok(removed) => {
            println!("🧹 Audit cleanup removed {} entries", removed);
            Json(CleanupResponse { removed }).into_response()
        }
        Err(e) => {
            eprintln!("Audit cleanup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Audit cleanup failed" })),
            )
                .into_response()
        }
    }
}

pub async fn verify_audit(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> axum::response::Response {
    let batch = req
        .batch
        .unwrap_or(state.config.integrity_batch_size as usize);

    match state.verifier.verify_batch(batch).await {
        Ok(report) => {
            if !report.mismatches.is_empty() {
                eprintln!(
                    "🚨 Integrity verification found {} mismatched entries",
                    report.mismatches.len()
                );
            }
            Json(report).into_response()
        }
        Err(e) => {
            eprintln!("Integrity verification failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Integrity verification failed" })),
            )
                .into_response()
        }
    }
}

pub async fn health_check(State(state): State<AppState>) -> axum::response::Response {
    match &state.redis {
        Some(redis) => match redis.ping().await {
            Ok(true) => Json(json!({ "status": "healthy", "backend": "redis" })).into_response(),
            Ok(false) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "backend": "redis" })),
            )
                .into_response(),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "backend": "redis", "error": e.to_string() })),
            )
                .into_response(),
        },
        None => Json(json!({ "status": "healthy", "backend": "memory" })).into_response(),
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
