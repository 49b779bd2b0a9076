//! Upload domain module
//!
//! This module contains the resilient upload path: validated storage paths,
//! the upload request/result entities, the error taxonomy, and the
//! coordinator that retries uploads through `users` replication lag.

mod entity;
mod error;
mod service;

pub use entity::{StoragePath, UploadRequest, UploadResult};
pub use error::{Result, UploadError};
pub use service::{SettleStrategy, UploadConfig, UploadCoordinator};
