use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::guard::middleware::{actor_context_middleware, api_rate_limit_middleware};
use crate::handlers;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Guarded surface: subject to the api_calls limit per actor.
    let guard_routes = Router::new()
        .route("/guard/message", post(handlers::post_message))
        .route("/guard/conversation", post(handlers::start_conversation))
        .route("/guard/login", post(handlers::login_check))
        .route("/guard/throttled/:actor_id", get(handlers::throttle_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api_rate_limit_middleware,
        ));

    // Admin surface: intentionally outside the api_calls limit so
    // operators can intervene while an actor is throttled.
    let admin_routes = Router::new()
        .route("/admin/limits/:actor_id", delete(handlers::clear_limits))
        .route("/admin/audit", get(handlers::query_audit))
        .route(
            "/admin/audit/export/:actor_id",
            get(handlers::export_audit),
        )
        .route("/admin/audit/cleanup", post(handlers::cleanup_audit))
        .route("/admin/audit/verify", post(handlers::verify_audit));

    Router::new()
        .merge(guard_routes)
        .merge(admin_routes)
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(middleware::from_fn(actor_context_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
