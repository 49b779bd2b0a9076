//! # Fellowship S3 Adapter
//!
//! `ObjectStore` implementation over S3-compatible storage (AWS S3, MinIO).

pub mod infrastructure;

pub use infrastructure::{S3ConfigError, S3ObjectStore};
