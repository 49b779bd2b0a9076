//! S3 Object Store Implementation
//!
//! This module implements the `ObjectStore` port using S3 as the backend.
//! It handles the `put_object` call and converts AWS errors to domain errors.

use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use fellowship_domain::ports::{ObjectStore, ObjectStoreError, StoredObject};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// Errors raised while configuring the S3 adapter
#[derive(Error, Debug)]
pub enum S3ConfigError {
    /// The public base URL is missing
    #[error("S3 public URL is empty")]
    MissingPublicUrl,
}

/// S3-based implementation of the ObjectStore port
///
/// This adapter translates uploads into S3 `put_object` calls. The bucket
/// comes from each upload; objects are addressed as
/// `{public_url}/{bucket}/{key}` (path-style, as served by MinIO).
///
/// ## Error Handling
///
/// S3 has no notion of an owner foreign key, so every AWS SDK error is
/// converted to `ObjectStoreError::Other` and never retried by the
/// coordinator.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    public_url: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    ///
    /// # Arguments
    ///
    /// * `client` - Configured AWS S3 client
    /// * `public_url` - Base URL objects are served from
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use aws_sdk_s3::Client;
    /// use fellowship_s3::infrastructure::S3ObjectStore;
    ///
    /// # async fn example(s3_client: Client) {
    /// let store = S3ObjectStore::new(s3_client, "http://localhost:9000").unwrap();
    /// # }
    /// ```
    pub fn new(client: Client, public_url: impl Into<String>) -> Result<Self, S3ConfigError> {
        let public_url = public_url.into().trim().trim_end_matches('/').to_string();
        if public_url.is_empty() {
            return Err(S3ConfigError::MissingPublicUrl);
        }
        info!(public_url = %public_url, "Initializing S3ObjectStore");
        Ok(Self { client, public_url })
    }

    /// Get the public base URL
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// URL an object is served from
    fn object_url(public_url: &str, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", public_url, bucket, key)
    }
}

impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, data), fields(data_size = data.len()))]
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> impl std::future::Future<Output = Result<StoredObject, ObjectStoreError>> + Send {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = path.to_string();
        let url = Self::object_url(&self.public_url, &bucket, &key);
        let content_type = content_type.map(str::to_string);

        async move {
            debug!(key = %key, bucket = %bucket, "Saving object to S3");

            let body = ByteStream::from(data);

            match client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(body)
                .set_content_type(content_type)
                .send()
                .await
            {
                Ok(_) => {
                    info!(key = %key, "Successfully saved object to S3");
                    Ok(StoredObject { url, key })
                }
                Err(err) => {
                    error!(key = %key, error = ?err, "Failed to save object to S3");
                    Err(ObjectStoreError::other(format!(
                        "S3 put_object failed for key '{}': {}",
                        key, err
                    )))
                }
            }
        }
    }
}
