//! Router configuration for the submission API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/documents", post(handlers::submit_document))
        .route("/api/documents/:doc_id", get(handlers::get_document))
        .route(
            "/api/documents/:doc_id/usage",
            get(handlers::get_document_usage),
        )
        .route("/api/batches", post(handlers::submit_batch))
        .route("/api/batches", get(handlers::list_batches))
        .route("/api/batches/:batch_id", get(handlers::get_batch))
        .route(
            "/api/batches/:batch_id/documents",
            get(handlers::get_batch_documents),
        )
        .route("/api/jobs", post(handlers::submit_job))
        .route("/api/jobs/:job_id", get(handlers::get_job))
        .route("/api/status", get(handlers::api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
