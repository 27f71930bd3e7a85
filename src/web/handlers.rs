use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use super::auth::Authorized;
use super::{ErrorBody, WebState};
use crate::core::diagnostics;
use crate::core::storage::basename;
use crate::core::{
    ArchiveLocator, BackupOption, CleanOutcome, DestinationReport, Dispatched, ProgressView,
    StorageError,
};

const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_');

/// Attachment header carrying an ASCII-safe `filename` plus the exact name
/// as `filename*`.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(name, FILENAME_ENCODE_SET)
    )
}

/// Errors surfaced by handlers, each with its own status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Invalid(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Invalid(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorBody::new(message))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => Self::NotFound("Backup file not found".to_string()),
            StorageError::UnknownDisk(_) => Self::NotFound(e.to_string()),
            StorageError::InvalidPath(_) => Self::BadRequest(e.to_string()),
            StorageError::Unreachable { .. } | StorageError::UnsupportedDriver { .. } => {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DestinationsResponse {
    pub success: bool,
    pub backup_name: String,
    pub destinations: Vec<DestinationReport>,
}

pub async fn destinations(_: Authorized, State(state): State<WebState>) -> Json<DestinationsResponse> {
    let inspector = &state.ctx.inspector;
    Json(DestinationsResponse {
        success: true,
        backup_name: inspector.backup_name().to_string(),
        destinations: inspector.inspect_all().await,
    })
}

#[derive(Debug, Default, Deserialize)]
struct CreateBackupRequest {
    #[serde(default)]
    option: Option<String>,
}

pub async fn create_backup(
    _: Authorized,
    State(state): State<WebState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: CreateBackupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateBackupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let option = BackupOption::parse(request.option.as_deref()).ok_or_else(|| {
        ApiError::Invalid(format!(
            "The selected option is invalid: {}",
            request.option.as_deref().unwrap_or_default()
        ))
    })?;

    match state.ctx.dispatcher.dispatch(option).await? {
        Dispatched::Queued {
            progress_key,
            queue,
        } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "message": "Backup has been queued and will start shortly.",
                "progress_key": progress_key,
                "queue": queue,
            })),
        )
            .into_response()),
        Dispatched::Finished(Ok(outcome)) => Ok(Json(json!({
            "success": true,
            "message": "Backup created successfully!",
            "attempts": outcome.attempts,
        }))
        .into_response()),
        Dispatched::Finished(Err(e)) => Err(ApiError::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    progress_key: Option<String>,
}

pub async fn status(
    _: Authorized,
    State(state): State<WebState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ProgressView>, ApiError> {
    let key = query
        .progress_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Progress key is required".to_string()))?;

    let record = state.ctx.progress.get(&key).await?;
    Ok(Json(ProgressView::from_lookup(record)))
}

pub async fn download(
    _: Authorized,
    State(state): State<WebState>,
    Path((disk_name, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let disk = state.ctx.disks.resolve(&disk_name).await?;
    let locator = ArchiveLocator::new(&state.ctx.config.backup.name);

    let located = locator.locate(disk.as_ref(), &path).await.map_err(|e| {
        warn!(disk = %disk_name, requested = %path, error = %e, "Backup file not found");
        ApiError::from(e)
    })?;
    let reader = disk.open_for_download(&located.path).await?;
    let size = disk.size(&located.path).await.ok();

    info!(disk = %disk_name, file = %located.path, tier = ?located.tier, "Streaming backup download");

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(basename(&located.path)),
        );
    if let Some(size) = size {
        response = response.header(header::CONTENT_LENGTH, size);
    }

    response
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| ApiError::Internal(format!("Download failed: {}", e)))
}

pub async fn delete_backup(
    _: Authorized,
    State(state): State<WebState>,
    Path((disk_name, path)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let disk = state.ctx.disks.resolve(&disk_name).await?;
    let locator = ArchiveLocator::new(&state.ctx.config.backup.name);

    let located = locator.locate(disk.as_ref(), &path).await?;
    disk.delete(&located.path).await.map_err(|e| {
        error!(disk = %disk_name, file = %located.path, error = %e, "Delete failed");
        ApiError::from(e)
    })?;

    info!(disk = %disk_name, file = %located.path, "Backup deleted");
    Ok(Json(json!({
        "success": true,
        "message": "Backup deleted successfully!",
        "path": located.path,
    })))
}

pub async fn clean(_: Authorized, State(state): State<WebState>) -> Json<CleanOutcome> {
    Json(state.ctx.dispatcher.runner().clean().await)
}

pub async fn diagnostics(
    _: Authorized,
    State(state): State<WebState>,
) -> Json<diagnostics::Diagnostics> {
    Json(diagnostics::collect(&state.ctx.config, &state.ctx.disks).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_plain_name() {
        assert_eq!(
            content_disposition("site-2024-01-17.zip"),
            "attachment; filename=\"site-2024-01-17.zip\"; filename*=UTF-8''site-2024-01-17.zip"
        );
    }

    #[test]
    fn test_content_disposition_escapes_quotes_and_controls() {
        let header = content_disposition("say \"hi\"\tcafé.zip");

        assert_eq!(
            header,
            "attachment; filename=\"say _hi__caf_.zip\"; filename*=UTF-8''say%20%22hi%22%09caf%C3%A9.zip"
        );
        assert!(axum::http::HeaderValue::from_str(&header).is_ok());
    }
}
