use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::hooks;
use crate::AppState;

/// Builds the hook surface `Router`.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Lifecycle hooks ─────────────────────────────────────
        .route("/hooks/before", post(hooks::before_request))
        .route("/hooks/after", post(hooks::after_response))
        // ── Liveness ────────────────────────────────────────────
        .route("/healthz", get(hooks::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
