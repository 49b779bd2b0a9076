//! Upload handler

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fellowship_baas::{BaasSessionProvider, BaasUserDirectory};
use fellowship_domain::{
    identity::{Principal, UserId},
    upload::{StoragePath, UploadCoordinator, UploadError, UploadRequest},
};
use tracing::{error, info, warn};

use crate::{
    dto::upload::{ErrorResponse, UploadFileRequest, UploadFileResponse},
    AppState,
};

/// Folder used when the request names neither a path nor a folder
const DEFAULT_FOLDER: &str = "uploads";

/// Seconds a client should wait before retrying an exhausted upload
const RETRY_AFTER_SECS: &str = "5";

/// Handle upload requests
#[utoipa::path(
    post,
    path = "/uploads",
    request_body = UploadFileRequest,
    responses(
        (status = 201, description = "File uploaded", body = UploadFileResponse),
        (status = 400, description = "Bad request - empty file or invalid path", body = ErrorResponse),
        (status = 401, description = "No valid session", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "User record could not be created", body = ErrorResponse),
        (status = 502, description = "Storage rejected the upload", body = ErrorResponse),
        (status = 503, description = "Upload retries exhausted, retry shortly", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "uploads"
)]
pub async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UploadFileRequest>,
) -> Response {
    info!(
        bucket = %payload.bucket,
        owner_id = %payload.owner_id,
        data_size = payload.data.len(),
        "Received upload request"
    );

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let sessions = BaasSessionProvider::from_authorization(state.baas.clone(), authorization);
    let store = state.storage.for_caller(sessions.access_token());

    let owner = UserId::new(payload.owner_id);
    let path = match resolve_path(
        payload.path,
        payload.folder.as_deref(),
        payload.filename.as_deref(),
        &owner,
    ) {
        Ok(path) => path,
        Err(err) => return error_response(err),
    };

    let principal = Principal {
        id: owner,
        email: payload.email,
        display_name: payload.display_name,
    };
    let mut request = UploadRequest::new(payload.bucket, path, payload.data);
    if let Some(content_type) = payload.content_type {
        request = request.with_content_type(content_type);
    }

    let coordinator = UploadCoordinator::new(
        sessions,
        BaasUserDirectory::new(state.baas.clone()),
        store,
        state.upload_config.clone(),
    );

    match coordinator.upload_with_retry(&principal, request).await {
        Ok(result) => {
            info!(key = %result.key, attempts = result.attempts, "Upload completed");
            (StatusCode::CREATED, Json(UploadFileResponse::from(result))).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Use the explicit path, or build `{folder}/{owner}/{filename}`
fn resolve_path(
    path: Option<String>,
    folder: Option<&str>,
    filename: Option<&str>,
    owner: &UserId,
) -> Result<StoragePath, UploadError> {
    match (path, filename) {
        (Some(path), _) => StoragePath::parse(path),
        (None, Some(filename)) => {
            StoragePath::for_owner(folder.unwrap_or(DEFAULT_FOLDER), owner, filename)
        }
        (None, None) => Err(UploadError::invalid_path("", "either path or filename is required")),
    }
}

/// HTTP status for an upload failure
pub(crate) fn error_status(err: &UploadError) -> StatusCode {
    match err {
        UploadError::Authentication(_) => StatusCode::UNAUTHORIZED,
        UploadError::InvalidFile(_) | UploadError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
        UploadError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::IdentitySync { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        UploadError::Storage(_) => StatusCode::BAD_GATEWAY,
        UploadError::Exhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        UploadError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: UploadError) -> Response {
    let status = error_status(&err);
    if status.is_server_error() {
        error!(error = %err, "Upload failed");
    } else {
        warn!(error = %err, "Upload rejected");
    }

    let body = Json(ErrorResponse {
        error: err.user_message(),
        detail: err.to_string(),
        retryable: err.is_retryable_later(),
    });

    if err.is_retryable_later() {
        (
            status,
            [(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS))],
            body,
        )
            .into_response()
    } else {
        (status, body).into_response()
    }
}
