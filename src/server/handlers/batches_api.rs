//! Batch submission and progress endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::documents_api::DocumentResponse;
use super::{attribution, error_response, sanitize_file_name, store_error_response};
use crate::blobs::PutOptions;
use crate::models::{Batch, NewDocument};
use crate::server::AppState;
use crate::store::{NewBatch, NewJob};

/// One document inside a batch submission.
#[derive(Debug, Deserialize)]
pub struct BatchDocumentInput {
    pub file_name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Document bytes, base64-encoded.
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub retention_days: Option<i64>,
}

/// Request body for batch submission.
#[derive(Debug, Deserialize)]
pub struct BatchSubmitRequest {
    pub documents: Vec<BatchDocumentInput>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Batch response format for the API.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub id: String,
    pub status: String,
    pub total_documents: i64,
    pub completed_documents: i64,
    pub failed_documents: i64,
    pub priority: i64,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl BatchResponse {
    fn from_batch(batch: Batch) -> Self {
        Self {
            id: batch.id,
            status: batch.status.as_str().to_string(),
            total_documents: batch.total_documents,
            completed_documents: batch.completed_documents,
            failed_documents: batch.failed_documents,
            priority: batch.priority,
            metadata: batch.metadata,
            created_at: batch.created_at.to_rfc3339(),
            completed_at: batch.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Response for a submitted batch.
#[derive(Debug, Serialize)]
pub struct BatchSubmitResponse {
    pub batch_id: String,
    pub document_ids: Vec<String>,
}

/// Accept a batch of base64-encoded documents and enqueue conversion for
/// each.
pub async fn submit_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchSubmitRequest>,
) -> impl IntoResponse {
    if request.documents.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "batch has no documents").into_response();
    }

    let (user_id, api_key_id) = attribution(&headers);
    let priority = request.priority.unwrap_or(0);

    let batch = match state
        .store
        .batches()
        .create(NewBatch {
            user_id: user_id.clone(),
            api_key_id: api_key_id.clone(),
            total_documents: request.documents.len() as i64,
            priority,
            metadata: request.metadata.unwrap_or_else(|| serde_json::json!({})),
        })
        .await
    {
        Ok(batch) => batch,
        Err(e) => return store_error_response(e).into_response(),
    };

    let mut document_ids = Vec::with_capacity(request.documents.len());
    for input in request.documents {
        let data = match base64::engine::general_purpose::STANDARD.decode(&input.content) {
            Ok(data) => data,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid base64 for '{}': {}", input.file_name, e),
                )
                .into_response()
            }
        };

        let file_name = sanitize_file_name(&input.file_name);
        let mime_type = input.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string())
        });

        let blob_key = format!("documents/{}/{}", Uuid::new_v4(), file_name);
        if let Err(e) = state
            .blobs
            .put(&blob_key, &data, &PutOptions {
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
            file_size: data.len() as u64,
            blob_key: Some(blob_key),
            user_id: user_id.clone(),
            api_key_id: api_key_id.clone(),
            batch_id: Some(batch.id.clone()),
            ..Default::default()
        };
        if let Some(metadata) = input.metadata {
            new_document.metadata = metadata;
        }
        if let Some(days) = input.retention_days {
            new_document.retention_days = days;
        }

        let document = match state.store.documents().create(new_document).await {
            Ok(doc) => doc,
            Err(e) => return store_error_response(e).into_response(),
        };

        if let Err(e) = state
            .store
            .queue()
            .create_job(
                NewJob::convert(document.id.clone())
                    .with_priority(priority)
                    .with_max_attempts(state.settings.max_attempts),
            )
            .await
        {
            return store_error_response(e).into_response();
        }
        document_ids.push(document.id);
    }

    (
        StatusCode::ACCEPTED,
        Json(BatchSubmitResponse {
            batch_id: batch.id,
            document_ids,
        }),
    )
        .into_response()
}

/// Query parameters for batch listing.
#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub limit: Option<u32>,
}

/// List batches, filtered to the calling user when attribution is present.
pub async fn list_batches(
    State(state): State<AppState>,
    Query(params): Query<ListBatchesQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (user_id, _) = attribution(&headers);
    let filter = if user_id.is_empty() {
        None
    } else {
        Some(user_id)
    };
    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    match state.store.batches().list(filter.as_deref(), limit) {
        Ok(batches) => Json(
            batches
                .into_iter()
                .map(BatchResponse::from_batch)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => store_error_response(e).into_response(),
    }
}

/// Fetch one batch with its derived progress.
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> impl IntoResponse {
    match state.store.batches().get(&batch_id) {
        Ok(Some(batch)) => Json(BatchResponse::from_batch(batch)).into_response(),
        Ok(None) => {
            error_response(StatusCode::NOT_FOUND, format!("batch {} not found", batch_id))
                .into_response()
        }
        Err(e) => store_error_response(e).into_response(),
    }
}

/// All documents belonging to a batch.
pub async fn get_batch_documents(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> impl IntoResponse {
    match state.store.documents().get_by_batch(&batch_id) {
        Ok(docs) => Json(
            docs.into_iter()
                .map(DocumentResponse::from_document)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => store_error_response(e).into_response(),
    }
}
