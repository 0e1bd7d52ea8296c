use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, state::ApiState};

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))

        // Quality statistics
        .route("/api/quality/stats", get(handlers::stats::get_quality_stats))

        // Cache administration
        .route("/api/quality/cache", get(handlers::cache::get_cache_stats))
        .route(
            "/api/quality/cache/invalidate",
            post(handlers::cache::invalidate_cache).delete(handlers::cache::invalidate_cache),
        )

        // Records export
        .route("/api/records/export", get(handlers::export::export_records))

        // Project databases
        .route(
            "/api/projects/:project_id/databases/:database_id",
            patch(handlers::databases::update_database),
        )

        // Add state
        .with_state(state)

        // Add tracing and CORS
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
