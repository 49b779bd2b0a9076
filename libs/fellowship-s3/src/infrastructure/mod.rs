//! S3 infrastructure adapters

mod s3_object_store;

pub use s3_object_store::{S3ConfigError, S3ObjectStore};
