//! DTOs for upload endpoints

use fellowship_domain::upload::UploadResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for the upload endpoint
#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadFileRequest {
    /// Target bucket
    #[schema(example = "gallery")]
    pub bucket: String,

    /// Full object path; when absent the path is `{folder}/{owner_id}/{filename}`
    #[serde(default)]
    #[schema(example = "events/2024/picnic.jpg")]
    pub path: Option<String>,

    /// Folder used to build the path (default: `uploads`)
    #[serde(default)]
    #[schema(example = "avatars")]
    pub folder: Option<String>,

    /// File name used to build the path
    #[serde(default)]
    #[schema(example = "picnic.jpg")]
    pub filename: Option<String>,

    /// MIME type of the file
    #[serde(default)]
    #[schema(example = "image/jpeg")]
    pub content_type: Option<String>,

    /// Raw file contents (array of bytes)
    #[schema(example = json!([72, 101, 108, 108, 111]))]
    pub data: Vec<u8>,

    /// Id of the uploading user; the session's id wins if they differ
    #[schema(example = "7c1d5e0a-8a5e-4a43-9a4e-2f1f0f1b2c3d")]
    pub owner_id: String,

    /// Email address to mirror into the users table
    #[serde(default)]
    pub email: Option<String>,

    /// Display name to mirror into the users table
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Response body for a successful upload
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadFileResponse {
    /// Public URL of the stored file
    pub url: String,
    /// Storage key to keep in the owning record
    pub key: String,
    /// Path that was written
    pub path: String,
    /// Number of upload attempts it took
    #[schema(example = 1)]
    pub attempts: u32,
}

impl From<UploadResult> for UploadFileResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            url: result.url,
            key: result.key,
            path: result.path,
            attempts: result.attempts,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Message suitable for showing to the uploader
    #[schema(example = "Your session has expired, please log in again.")]
    pub error: String,
    /// Underlying error
    pub detail: String,
    /// True when the same upload may succeed if retried shortly
    pub retryable: bool,
}
