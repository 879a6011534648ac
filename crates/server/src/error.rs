use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clinicbooks_ingest::IngestError;
use clinicbooks_storage::StorageError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(err) | ApiError::Ingest(IngestError::Storage(err)) => storage_status(err),
            ApiError::Ingest(IngestError::NoFiles) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::UploadNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ingest(IngestError::AlreadyFinished { .. } | IngestError::StillRunning(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Ingest(IngestError::Task(_) | IngestError::Totals(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::ConcurrencyConflict(_) | StorageError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        err if err.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_status() {
        assert_eq!(
            ApiError::Storage(StorageError::NotFound("version 3".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Ingest(IngestError::NoFiles).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Ingest(IngestError::Storage(StorageError::Corrupt("x".into()))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Storage(StorageError::Database(sqlx_pool_closed())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::Ingest(IngestError::StillRunning(7)).status(), StatusCode::CONFLICT);
    }

    fn sqlx_pool_closed() -> clinicbooks_storage::SqlxError {
        clinicbooks_storage::SqlxError::PoolClosed
    }
}
