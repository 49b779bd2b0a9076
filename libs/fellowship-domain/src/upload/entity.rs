//! Upload entities
//!
//! `StoragePath` is a validated object path. `UploadRequest` and
//! `UploadResult` are the transient input and output of one upload call; the
//! coordinator never persists either.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::identity::UserId;
use crate::upload::error::UploadError;

/// Length of the random token inserted into retried paths
const PATH_TOKEN_LEN: usize = 8;

/// A validated object path of the form `dir/.../filename`
///
/// # Example
///
/// ```rust
/// use fellowship_domain::upload::StoragePath;
///
/// let path = StoragePath::parse("resources/u1/sermon-notes.pdf").unwrap();
/// assert_eq!(path.filename(), "sermon-notes.pdf");
///
/// let retried = path.mutated();
/// assert!(retried.as_str().starts_with("resources/u1/"));
/// assert!(retried.as_str().ends_with("-sermon-notes.pdf"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath {
    full: String,
    filename_start: usize,
}

impl StoragePath {
    /// Validate and wrap a path
    ///
    /// # Errors
    ///
    /// Returns `UploadError::InvalidPath` for empty paths, a leading `/`,
    /// empty segments (`a//b`, trailing `/`) and `.` or `..` segments.
    pub fn parse(path: impl Into<String>) -> Result<Self, UploadError> {
        let full = path.into();

        if full.trim().is_empty() {
            return Err(UploadError::invalid_path(&full, "path is empty"));
        }
        if full.starts_with('/') {
            return Err(UploadError::invalid_path(&full, "path must be relative"));
        }
        for segment in full.split('/') {
            if segment.is_empty() {
                return Err(UploadError::invalid_path(&full, "path has an empty segment"));
            }
            if segment == "." || segment == ".." {
                return Err(UploadError::invalid_path(
                    &full,
                    "path may not contain '.' or '..' segments",
                ));
            }
        }

        let filename_start = full.rfind('/').map(|idx| idx + 1).unwrap_or(0);
        Ok(Self {
            full,
            filename_start,
        })
    }

    /// Build `folder/owner/filename`, sanitizing the filename
    ///
    /// Characters outside `[A-Za-z0-9._-]` in the filename are replaced by `_`.
    pub fn for_owner(folder: &str, owner: &UserId, filename: &str) -> Result<Self, UploadError> {
        let sanitized = sanitize_filename(filename);
        if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
            return Err(UploadError::invalid_path(filename, "filename is empty"));
        }
        let folder = folder.trim_matches('/');
        Self::parse(format!("{}/{}/{}", folder, owner, sanitized))
    }

    /// The full path
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The directory part, without trailing `/` (`None` for a bare filename)
    pub fn dir(&self) -> Option<&str> {
        if self.filename_start == 0 {
            None
        } else {
            Some(&self.full[..self.filename_start - 1])
        }
    }

    /// The last path segment
    pub fn filename(&self) -> &str {
        &self.full[self.filename_start..]
    }

    /// A fresh variant of this path with `{millis}-{token}-` before the filename
    ///
    /// Used on retries so a new attempt never collides with an object a
    /// previous attempt may have partially written.
    pub fn mutated(&self) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        let prefix = format!(
            "{}-{}-",
            Utc::now().timestamp_millis(),
            &token[..PATH_TOKEN_LEN]
        );
        let full = match self.dir() {
            Some(dir) => format!("{}/{}{}", dir, prefix, self.filename()),
            None => format!("{}{}", prefix, self.filename()),
        };
        Self {
            filename_start: self.filename_start,
            full,
        }
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One upload to perform
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target bucket
    pub bucket: String,

    /// Path requested by the caller; retries write to mutated variants
    pub path: StoragePath,

    /// File contents
    pub data: Bytes,

    /// MIME type forwarded to the object store
    pub content_type: Option<String>,
}

impl UploadRequest {
    /// Create a request without a content type
    pub fn new(bucket: impl Into<String>, path: StoragePath, data: impl Into<Bytes>) -> Self {
        Self {
            bucket: bucket.into(),
            path,
            data: data.into(),
            content_type: None,
        }
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Size of the file in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Outcome of a successful upload
///
/// The caller stores `key` / `url` in its own domain record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    /// Public URL of the stored object
    pub url: String,

    /// Storage key of the object
    pub key: String,

    /// Path that was actually written (differs from the requested path after a retry)
    pub path: String,

    /// Number of upload attempts it took
    pub attempts: u32,
}
