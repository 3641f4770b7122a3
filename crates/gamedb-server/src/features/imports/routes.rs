use crate::api::response::{ApiResponse, ErrorResponse};
use crate::features::FeatureState;
use crate::ingest::{ErrorClass, IngestError};
use crate::middleware::{Caller, Unauthorized};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::{
    commands::{ProcessImportCommand, UploadArchiveCommand},
    queries::{GetImportJobError, GetImportJobQuery},
};

const IMPORT_FORBIDDEN: &str = "You are not allowed to import games.";

/// Name of the multipart field carrying the archive
pub const FILE_FIELD: &str = "file";

pub fn imports_routes(max_upload_bytes: usize) -> Router<FeatureState> {
    Router::new()
        .route(
            "/import",
            post(upload_archive).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/import-task", post(process_import))
        .route("/import/jobs/:id", get(get_import_job))
}

#[tracing::instrument(skip(state, caller, multipart))]
async fn upload_archive(
    State(state): State<FeatureState>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ImportApiError> {
    let admin = caller.require_admin(IMPORT_FORBIDDEN)?;
    let mut multipart =
        multipart.map_err(|e| IngestError::Validation(e.body_text()))?;

    let mut command: Option<UploadArchiveCommand> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await?;
        command = Some(UploadArchiveCommand { file_name, data });
    }

    let command = command.ok_or_else(|| {
        IngestError::Validation(format!("Missing multipart field '{}'", FILE_FIELD))
    })?;

    let response = super::commands::upload::handle(&state, &admin, command).await?;
    Ok(ApiResponse::success(response).into_response())
}

#[tracing::instrument(skip(state, caller, payload))]
async fn process_import(
    State(state): State<FeatureState>,
    caller: Caller,
    payload: Result<Json<ProcessImportCommand>, JsonRejection>,
) -> Result<Response, ImportApiError> {
    let admin = caller.require_admin(IMPORT_FORBIDDEN)?;
    let Json(command) = payload.map_err(|e| IngestError::Validation(e.body_text()))?;

    // A terminal failure is still an acknowledged delivery; only transient
    // and busy outcomes answer non-2xx so the caller redelivers.
    let result = super::commands::process::handle(&state, &admin, command).await?;
    if !result.is_success() {
        tracing::warn!(handle = %result.handle, error = ?result.error, "Import task failed permanently");
    }
    Ok(ApiResponse::success(result).into_response())
}

#[tracing::instrument(skip(state, caller, id))]
async fn get_import_job(
    State(state): State<FeatureState>,
    caller: Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, ImportApiError> {
    caller.require_admin(IMPORT_FORBIDDEN)?;
    let Path(id) = id.map_err(|e| IngestError::Validation(e.body_text()))?;

    let job = super::queries::get_job::handle(state.queue.as_ref(), GetImportJobQuery { id }).await?;
    Ok(ApiResponse::success(job).into_response())
}

#[derive(Debug)]
enum ImportApiError {
    Unauthorized(Unauthorized),
    Ingest(IngestError),
    Upload(MultipartError),
    Job(GetImportJobError),
}

impl From<Unauthorized> for ImportApiError {
    fn from(err: Unauthorized) -> Self {
        Self::Unauthorized(err)
    }
}

impl From<IngestError> for ImportApiError {
    fn from(err: IngestError) -> Self {
        Self::Ingest(err)
    }
}

impl From<MultipartError> for ImportApiError {
    fn from(err: MultipartError) -> Self {
        Self::Upload(err)
    }
}

impl From<GetImportJobError> for ImportApiError {
    fn from(err: GetImportJobError) -> Self {
        Self::Job(err)
    }
}

fn status_for(class: ErrorClass) -> (StatusCode, &'static str) {
    match class {
        ErrorClass::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        ErrorClass::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        ErrorClass::MalformedArchive => (StatusCode::BAD_REQUEST, "MALFORMED_ARCHIVE"),
        ErrorClass::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
        ErrorClass::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorClass::ParseFailure => (StatusCode::UNPROCESSABLE_ENTITY, "PARSE_FAILURE"),
        ErrorClass::Storage => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR"),
        ErrorClass::Queue => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_ERROR"),
        ErrorClass::Busy => (StatusCode::CONFLICT, "BUSY"),
    }
}

impl IntoResponse for ImportApiError {
    fn into_response(self) -> Response {
        match self {
            ImportApiError::Unauthorized(err) => {
                let error = ErrorResponse::new("UNAUTHORIZED", err.to_string());
                (StatusCode::UNAUTHORIZED, Json(error)).into_response()
            },
            ImportApiError::Ingest(err) => {
                let (status, code) = status_for(err.class());
                let message = match &err {
                    IngestError::Storage(_) => {
                        tracing::error!("Storage error during import: {:#}", err);
                        "Staging storage is unavailable".to_string()
                    },
                    IngestError::Queue(_) => {
                        tracing::error!("Queue error during import: {}", err);
                        "Import jobs could not be scheduled".to_string()
                    },
                    _ => err.to_string(),
                };
                (status, Json(ErrorResponse::new(code, message))).into_response()
            },
            ImportApiError::Upload(err) => {
                let error = ErrorResponse::new("INVALID_UPLOAD", err.body_text());
                (err.status(), Json(error)).into_response()
            },
            ImportApiError::Job(GetImportJobError::NotFound(id)) => {
                let error = ErrorResponse::new("NOT_FOUND", format!("Import job {} not found", id));
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            },
            ImportApiError::Job(GetImportJobError::Queue(err)) => {
                tracing::error!("Queue error while reading import job: {}", err);
                let error = ErrorResponse::new("QUEUE_ERROR", "Import jobs are unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, Json(error)).into_response()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use gamedb_common::PayloadHandle;

    #[test]
    fn test_every_class_has_a_status() {
        assert_eq!(status_for(ErrorClass::Busy).0, StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorClass::ParseFailure).0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorClass::Storage).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorClass::Queue).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorClass::MalformedArchive).0, StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorClass::PayloadTooLarge).0, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_oversized_entry_is_not_reported_as_malformed() {
        let response = ImportApiError::Ingest(IngestError::PayloadTooLarge {
            name: "big.json".into(),
            limit: 16,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_storage_details_are_hidden() {
        let response =
            ImportApiError::Ingest(IngestError::Storage(anyhow::anyhow!("s3://secret-bucket down")))
                .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_busy_is_conflict() {
        let response =
            ImportApiError::Ingest(IngestError::Busy(PayloadHandle::generate())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
