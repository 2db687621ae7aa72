use axum::{
    http::HeaderValue,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::events_ws::events_ws_handler;
use super::gateway::video_ws_handler;
use super::handlers;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.get().server.allowed_origins);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/sessions/:session_id/events", post(handlers::record_event))
        .route("/sessions/:session_id/live", get(handlers::live_status));

    // Authentication happens per upgrade, not in middleware
    let ws_routes = Router::new()
        .route("/video/:session_id", any(video_ws_handler))
        .route("/events/:session_id", any(events_ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
