//! API layer - HTTP handlers and routing
//!
//! Two surfaces share one app:
//! - `/wopi/...`: the WOPI protocol spoken by the editor, authenticated by
//!   per-session access tokens in the query string
//! - `/sessions/...`: the management API spoken by the application,
//!   authenticated by tenant API tokens in the Authorization header

pub mod middleware;
pub mod sessions;
pub mod wopi;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthTenant};

/// Health check endpoint for container orchestration
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str, request_timeout: Duration) -> Router {
    let allow_origin = if cors_origin == "*" {
        AllowOrigin::any()
    } else {
        cors_origin
            .parse::<HeaderValue>()
            .map(AllowOrigin::exact)
            .unwrap_or_else(|_| AllowOrigin::any())
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    // Management routes require a tenant API token
    let management = sessions::router().route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::require_tenant,
    ));

    Router::new()
        .route("/health", get(health))
        .nest("/wopi", wopi::router())
        .nest("/sessions", management)
        .layer(cors)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
