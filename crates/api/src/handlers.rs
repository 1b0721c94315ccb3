use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use feedback::FeedbackRecord;
use ingest::allowed_file;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::metrics::MetricsSnapshot;
use crate::pipeline;
use crate::session::SessionRecord;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let result = handle_upload(&state, &headers, multipart).await;
    state.metrics.record_upload(result.is_ok());
    result
}

async fn handle_upload(
    state: &AppState,
    headers: &HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            upload = Some((filename, bytes));
            break;
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::BadRequest("No file part".into()))?;
    if filename.is_empty() {
        return Err(ApiError::BadRequest("No selected file".into()));
    }
    if !allowed_file(&filename) {
        return Err(ApiError::BadRequest("Unsupported file type".into()));
    }

    let document = state.uploads.save(&filename, &bytes).await?;
    let outcome = pipeline::process(state, &document).await?;
    let body = outcome.to_json()?;

    let existing = state.sessions.session_id(headers);
    let session_id = existing.unwrap_or_else(Uuid::new_v4);
    if let (Some(excel_filename), Some(excel_path)) = (&outcome.excel_filename, &outcome.excel_path) {
        let record = SessionRecord {
            excel_filename: Some(excel_filename.clone()),
            excel_path: Some(excel_path.display().to_string()),
        };
        if let Err(e) = state.sessions.store(&session_id, &record).await {
            warn!(session = %session_id, error = %format!("{e:#}"), "Failed to update session");
        }
    }

    let mut response = Json(body).into_response();
    if existing.is_none() {
        let cookie = state.sessions.set_cookie_header(&session_id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    filename: Option<String>,
}

pub async fn download_excel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let requested = query
        .filename
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Excel filename is required".into()))?;

    if let Some(id) = state.sessions.session_id(&headers) {
        let last = state.sessions.load(&id).await.and_then(|r| r.excel_filename);
        debug!(session = %id, last = ?last, requested = %requested, "Download requested");
    }

    let path = state
        .uploads
        .resolve(&requested)
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {requested}")))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "Requested spreadsheet does not exist");
            return Err(ApiError::NotFound(format!("File not found: {filename}")));
        }
        Err(e) => return Err(ApiError::Download(e)),
    };

    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    extracted_entities: Value,
    #[serde(default)]
    corrected_entities: Value,
    #[serde(default)]
    confidence_scores: Value,
}

#[derive(Serialize)]
pub struct FeedbackSaved {
    message: &'static str,
    filename: String,
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackSaved>, ApiError> {
    let path = state
        .feedback
        .save(
            req.original_text,
            req.extracted_entities,
            req.corrected_entities,
            req.confidence_scores,
        )
        .await?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(FeedbackSaved {
        message: "Feedback saved successfully",
        filename,
    }))
}

#[derive(Serialize)]
pub struct FeedbackList {
    feedback_files: Vec<String>,
}

pub async fn list_feedback(State(state): State<AppState>) -> Result<Json<FeedbackList>, ApiError> {
    Ok(Json(FeedbackList {
        feedback_files: state.feedback.list().await?,
    }))
}

pub async fn get_feedback(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<FeedbackRecord>, ApiError> {
    Ok(Json(state.feedback.load(&filename).await?))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    ner_backend: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        ner_backend: state.extractor.backend().to_string(),
    })
}

pub async fn get_stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
