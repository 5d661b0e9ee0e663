use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::models::RateLimitError;
use crate::state::AppState;

/// Identity a request acts as, extracted once per request.
#[derive(Clone, Debug)]
pub struct ActorContext {
    pub actor_id: String,
    pub source_addr: String,
}

/// Extracts the actor id header and source address into an
/// [`ActorContext`] request extension. Requests without the header act as
/// the anonymous actor; the rate limits still apply to it.
pub async fn actor_context_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let actor_id = req
        .headers()
        .get("X-Actor-Id")
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string();

    req.extensions_mut().insert(ActorContext {
        actor_id,
        source_addr: addr.ip().to_string(),
    });

    next.run(req).await
}

/// Applies the api_calls limit to every guarded route. Runs after
/// [`actor_context_middleware`] so the context is present.
pub async fn api_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ctx) = req.extensions().get::<ActorContext>().cloned() {
        let result = state.rate_limiter.check_api_call(&ctx.actor_id).await;
        if !result.allowed {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!(RateLimitError::new(result.retry_after_secs.unwrap_or(1)))),
            )
                .into_response();
        }
    }

    next.run(req).await
}
