//! Job submission and status endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{error_response, store_error_response};
use crate::models::{Job, JobType};
use crate::server::AppState;
use crate::store::NewJob;

/// Job response format for the API.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub document_id: String,
    pub job_type: String,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl JobResponse {
    fn from_job(job: Job) -> Self {
        Self {
            id: job.id,
            document_id: job.document_id,
            job_type: job.job_type.as_str().to_string(),
            status: job.status.as_str().to_string(),
            priority: job.priority,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            error: job.error,
            result: job.result,
            scheduled_at: job.scheduled_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

/// Request body for direct job creation.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub document_id: String,
    /// "convert" or "archive".
    pub job_type: String,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// Enqueue a job for an existing document.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    let Some(job_type) = JobType::from_str(&request.job_type) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown job type '{}'", request.job_type),
        )
        .into_response();
    };

    match state.store.documents().get(&request.document_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("document {} not found", request.document_id),
            )
            .into_response()
        }
        Err(e) => return store_error_response(e).into_response(),
    }

    let new_job = NewJob {
        job_type,
        ..NewJob::convert(request.document_id)
    }
    .with_priority(request.priority.unwrap_or(0))
    .with_max_attempts(state.settings.max_attempts);

    match state.store.queue().create_job(new_job).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(JobResponse::from_job(job))).into_response(),
        Err(e) => store_error_response(e).into_response(),
    }
}

/// Fetch one job row.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.store.queue().get(&job_id) {
        Ok(Some(job)) => Json(JobResponse::from_job(job)).into_response(),
        Ok(None) => {
            error_response(StatusCode::NOT_FOUND, format!("job {} not found", job_id))
                .into_response()
        }
        Err(e) => store_error_response(e).into_response(),
    }
}
