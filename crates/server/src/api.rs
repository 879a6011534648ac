use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clinicbooks_ingest::{
    run_audit, AuditReport, Orchestrator, ProgressEvent, ProgressStatus, UploadFile,
};
use clinicbooks_storage::{
    self as storage, DbPool, UploadHistory, UploadPage, UploadStatus, VersionFilter, VersionGroup,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orchestrator: Orchestrator,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/uploads", post(submit_upload).get(upload_history))
        .route("/api/uploads/{id}", get(upload_detail))
        .route("/api/uploads/{id}/progress", get(upload_progress))
        .route("/api/uploads/{id}/resume", post(resume_upload))
        .route(
            "/api/uploads/{upload_id}/versions/{version_id}/rollback",
            post(rollback_version),
        )
        .route("/api/versions", get(version_history))
        .route("/api/audit", post(audit))
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %Uuid::new_v4(),
                    )
                }))
                .layer(RequestBodyLimitLayer::new(max_upload_bytes)),
        )
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    upload_id: i64,
}

async fn read_files(mut multipart: Multipart) -> Result<Vec<UploadFile>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field
            .file_name()
            .or_else(|| field.name())
            .unwrap_or("upload")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        files.push(UploadFile::new(name, bytes.to_vec()));
    }
    Ok(files)
}

// POST /api/uploads
async fn submit_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let files = read_files(multipart).await?;
    let ticket = state.orchestrator.submit(files).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            upload_id: ticket.upload_id,
        }),
    ))
}

// POST /api/uploads/{id}/resume
async fn resume_upload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let files = read_files(multipart).await?;
    let ticket = state.orchestrator.resume(id, files).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            upload_id: ticket.upload_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageParams {
    page: Option<u32>,
    per_page: Option<u32>,
}

// GET /api/uploads
async fn upload_history(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<UploadPage>, ApiError> {
    let page = storage::list_uploads(
        &state.pool,
        params.page.unwrap_or(1),
        params.per_page.unwrap_or(20),
    )
    .await?;
    Ok(Json(page))
}

async fn find_upload(pool: &DbPool, id: i64) -> Result<UploadHistory, ApiError> {
    storage::get_upload(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload {id}")))
}

// GET /api/uploads/{id}
async fn upload_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UploadHistory>, ApiError> {
    Ok(Json(find_upload(&state.pool, id).await?))
}

// GET /api/uploads/{id}/progress
async fn upload_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProgressEvent>, ApiError> {
    if let Some(event) = state.orchestrator.progress().latest(id) {
        return Ok(Json(event));
    }
    // Batches from an earlier process only have their history row.
    let upload = find_upload(&state.pool, id).await?;
    Ok(Json(event_from_history(&upload)))
}

fn event_from_history(upload: &UploadHistory) -> ProgressEvent {
    let status = match upload.status {
        UploadStatus::Pending | UploadStatus::Processing => ProgressStatus::Processing,
        UploadStatus::Completed | UploadStatus::CompletedWithErrors => ProgressStatus::Completed,
        UploadStatus::Failed => ProgressStatus::Failed,
    };
    ProgressEvent {
        upload_id: upload.id,
        status,
        progress: if upload.status.is_terminal() { 100 } else { 0 },
        current_file: None,
        records_processed: usize::try_from(upload.records_count).unwrap_or_default(),
        message: Some(format!("upload {}", upload.status)),
        error: upload.error_message.clone(),
        result: None,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RolledBack {
    new_version_number: i64,
}

// POST /api/uploads/{upload_id}/versions/{version_id}/rollback
async fn rollback_version(
    State(state): State<AppState>,
    Path((upload_id, version_id)): Path<(i64, i64)>,
) -> Result<Json<RolledBack>, ApiError> {
    find_upload(&state.pool, upload_id).await?;
    let version = storage::get_version(&state.pool, version_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("version {version_id}")))?;

    // Only clinic-months this upload wrote can be rolled back through it.
    if !storage::version_exists_for_upload(&state.pool, upload_id, version.key()).await? {
        return Err(ApiError::NotFound(format!(
            "version {version_id} in upload {upload_id}"
        )));
    }

    let new_version_number = storage::rollback(&state.pool, version_id).await?;
    Ok(Json(RolledBack { new_version_number }))
}

// GET /api/versions
async fn version_history(
    State(state): State<AppState>,
    Query(filter): Query<VersionFilter>,
) -> Result<Json<Vec<VersionGroup>>, ApiError> {
    Ok(Json(storage::list_version_groups(&state.pool, filter).await?))
}

#[derive(Debug, Deserialize)]
struct AuditParams {
    #[serde(default)]
    fix: bool,
}

// POST /api/audit
async fn audit(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<AuditReport>, ApiError> {
    Ok(Json(run_audit(&state.pool, params.fix).await?))
}
