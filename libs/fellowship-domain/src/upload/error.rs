//! Domain errors for upload operations

use thiserror::Error;

/// Errors that can occur while uploading a file on behalf of a user
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// No valid session: missing, expired, or without a principal id
    #[error("Authentication required: {0}")]
    Authentication(String),

    /// The owning `users` row could not be established
    #[error("Could not sync user record (upsert: {upsert}; insert: {insert})")]
    IdentitySync { upsert: String, insert: String },

    /// The object store rejected the upload for a reason retries cannot fix
    #[error("Upload failed: {0}")]
    Storage(String),

    /// Every attempt failed with a constraint violation
    #[error("Upload failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The file cannot be uploaded as given
    #[error("Invalid file: {0}")]
    InvalidFile(String),

    /// The file exceeds the configured size limit
    #[error("File size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    /// The requested object path is not acceptable
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The caller cancelled the upload
    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Create an authentication error with a message
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an identity sync error from both failed writes
    pub fn identity_sync(upsert: impl Into<String>, insert: impl Into<String>) -> Self {
        Self::IdentitySync {
            upsert: upsert.into(),
            insert: insert.into(),
        }
    }

    /// Create a permanent storage error with a message
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an exhausted-retries error
    pub fn exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::Exhausted {
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Create an invalid file error with a message
    pub fn invalid_file(msg: impl Into<String>) -> Self {
        Self::InvalidFile(msg.into())
    }

    /// Create a file too large error
    pub fn file_too_large(size: usize, max: usize) -> Self {
        Self::FileTooLarge { size, max }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True if the same upload may succeed when tried again shortly
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Message a form can show to the person uploading
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication(_) => "Your session has expired, please log in again.".to_string(),
            Self::Exhausted { .. } => {
                "The upload could not be completed yet, please retry in a few moments.".to_string()
            }
            Self::Storage(msg) => msg.clone(),
            Self::IdentitySync { .. } => {
                "Your account could not be prepared for uploads, please contact an administrator."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;
