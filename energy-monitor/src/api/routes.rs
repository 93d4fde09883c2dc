use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::{handlers, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/summary", get(handlers::summary))
        .route("/history", get(handlers::history))
        .route("/download", get(handlers::download))
        .route("/on", get(handlers::power_on))
        .route("/off", get(handlers::power_off))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
