//! Error types and backend error classification
//!
//! The auth, PostgREST and storage services each return their own error
//! payload shape. `BackendFailure` reads all of them so the adapters can map
//! a failure to a tagged domain error in one place.

use std::fmt;

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// SQLSTATE for a unique constraint violation
const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE for a foreign key constraint violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Errors raised while setting up the BaaS adapters
#[derive(Error, Debug)]
pub enum BaasError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BaasError {
    /// Create a config error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Union of the error payloads returned by the backend services
#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    /// PostgREST SQLSTATE (`"23505"`) or auth status code (`401`)
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// A non-success response from the backend
#[derive(Debug, Clone)]
pub(crate) struct BackendFailure {
    pub status: StatusCode,
    pub code: Option<String>,
    pub message: String,
    details: Option<String>,
}

impl BackendFailure {
    /// Consume a failed response and read its error payload
    pub(crate) async fn from_response(response: Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Self::from_body(status, &text)
    }

    pub(crate) fn from_body(status: StatusCode, body: &str) -> Self {
        let payload: ErrorPayload = serde_json::from_str(body).unwrap_or_default();

        let code = payload.code.and_then(|code| match code {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let message = payload
            .message
            .or(payload.msg)
            .or(payload.error)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                } else {
                    body.trim().to_string()
                }
            });

        Self {
            status,
            code,
            message,
            details: payload.details,
        }
    }

    /// The row already exists
    pub(crate) fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION) || self.status == StatusCode::CONFLICT
    }

    /// The write referenced an owner row that is not visible (yet)
    ///
    /// The storage API does not always forward the SQLSTATE, so the message
    /// is inspected as well.
    pub(crate) fn is_foreign_key_violation(&self) -> bool {
        if self.code.as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            return true;
        }
        let mentions_fk = |text: &str| text.to_ascii_lowercase().contains("foreign key");
        mentions_fk(&self.message) || self.details.as_deref().is_some_and(mentions_fk)
    }

    /// The caller is not (or no longer) authenticated
    pub(crate) fn is_unauthorized(&self) -> bool {
        matches!(
            self.status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        )
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}): {}", self.status, code, self.message),
            None => write!(f, "{}: {}", self.status, self.message),
        }
    }
}
