//! Service status endpoint.

use std::collections::HashMap;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use super::store_error_response;
use crate::server::AppState;

/// Aggregate queue and document counts.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub documents: HashMap<String, i64>,
    pub jobs: HashMap<String, i64>,
    pub worker_count: usize,
}

/// Counts per status for documents and jobs.
pub async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let documents = match state.store.documents().count_by_status() {
        Ok(counts) => counts.into_iter().collect(),
        Err(e) => return store_error_response(e).into_response(),
    };
    let jobs = match state.store.queue().count_by_status() {
        Ok(counts) => counts.into_iter().collect(),
        Err(e) => return store_error_response(e).into_response(),
    };

    Json(StatusResponse {
        documents,
        jobs,
        worker_count: state.settings.worker_count,
    })
    .into_response()
}
