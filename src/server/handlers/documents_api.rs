//! Document submission and status endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{attribution, error_response, sanitize_file_name, store_error_response};
use crate::blobs::PutOptions;
use crate::models::{Document, NewDocument};
use crate::server::AppState;
use crate::store::NewJob;

/// Query parameters for document submission.
#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    /// Original file name; falls back to the x-file-name header.
    pub file_name: Option<String>,
    /// Job priority, higher first.
    pub priority: Option<i64>,
    /// Days to retain the original blob.
    pub retention_days: Option<i64>,
}

/// Response for a submitted document.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub document_id: String,
    pub job_id: String,
    pub status: String,
}

/// Document response format for the API.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: u64,
    pub status: String,
    pub content: Option<String>,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
    pub batch_id: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub archived_at: Option<String>,
}

impl DocumentResponse {
    pub fn from_document(doc: Document) -> Self {
        Self {
            id: doc.id,
            file_name: doc.file_name,
            mime_type: doc.mime_type,
            file_size: doc.file_size,
            status: doc.status.as_str().to_string(),
            content: doc.content,
            metadata: doc.metadata,
            error: doc.error,
            batch_id: doc.batch_id,
            created_at: doc.created_at.to_rfc3339(),
            processed_at: doc.processed_at.map(|t| t.to_rfc3339()),
            archived_at: doc.archived_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Accept a raw document upload, store the blob, and enqueue conversion.
pub async fn submit_document(
    State(state): State<AppState>,
    Query(params): Query<SubmitQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty request body").into_response();
    }

    let file_name = params
        .file_name
        .clone()
        .or_else(|| {
            headers
                .get("x-file-name")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .map(|s| sanitize_file_name(&s))
        .unwrap_or_else(|| "upload.bin".to_string());

    let mime_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string())
        });

    let (user_id, api_key_id) = attribution(&headers);
    let blob_key = format!("documents/{}/{}", Uuid::new_v4(), file_name);

    if let Err(e) = state
        .blobs
        .put(&blob_key, &body, &PutOptions {
            mime: Some(mime_type.clone()),
            acl: None,
        })
        .await
    {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("blob upload failed: {}", e),
        )
        .into_response();
    }

    let mut new_document = NewDocument {
        file_name,
        mime_type,
        file_size: body.len() as u64,
        blob_key: Some(blob_key),
        user_id,
        api_key_id,
        ..Default::default()
    };
    if let Some(days) = params.retention_days {
        new_document.retention_days = days;
    }

    let document = match state.store.documents().create(new_document).await {
        Ok(doc) => doc,
        Err(e) => return store_error_response(e).into_response(),
    };

    let new_job = NewJob::convert(document.id.clone())
        .with_priority(params.priority.unwrap_or(0))
        .with_max_attempts(state.settings.max_attempts);
    let job = match state.store.queue().create_job(new_job).await {
        Ok(job) => job,
        Err(e) => return store_error_response(e).into_response(),
    };

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            document_id: document.id,
            job_id: job.id,
            status: document.status.as_str().to_string(),
        }),
    )
        .into_response()
}

/// Fetch a document with its conversion state.
pub async fn get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> impl IntoResponse {
    match state.store.documents().get(&doc_id) {
        Ok(Some(doc)) => Json(DocumentResponse::from_document(doc)).into_response(),
        Ok(None) => {
            error_response(StatusCode::NOT_FOUND, format!("document {} not found", doc_id))
                .into_response()
        }
        Err(e) => store_error_response(e).into_response(),
    }
}

/// Usage rows recorded for a document.
pub async fn get_document_usage(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> impl IntoResponse {
    match state.store.usage().for_document(&doc_id) {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_error_response(e).into_response(),
    }
}
