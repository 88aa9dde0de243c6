//! Request handlers for the submission API.

mod batches_api;
mod documents_api;
mod jobs_api;
mod status_api;

pub use batches_api::{get_batch, get_batch_documents, list_batches, submit_batch};
pub use documents_api::{get_document, get_document_usage, submit_document};
pub use jobs_api::{get_job, submit_job};
pub use status_api::api_status;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::store::StoreError;

/// Error payload for all endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) fn store_error_response(e: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        StoreError::OperationBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

/// Attribution headers. Authentication is out of scope; the values are
/// recorded verbatim.
pub(crate) fn attribution(headers: &HeaderMap) -> (String, String) {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    (get("x-user-id"), get("x-api-key-id"))
}

/// Keep only the final path component and drop characters that do not
/// belong in a blob key.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("a/b/c.pdf"), "c.pdf");
        assert_eq!(sanitize_file_name("we ird (1).pdf"), "we_ird__1_.pdf");
        assert_eq!(sanitize_file_name(""), "upload.bin");
    }
}
