//! Object storage through the BaaS storage API

use bytes::Bytes;
use fellowship_domain::ports::{ObjectStore, ObjectStoreError, StoredObject};
use tracing::{debug, error, info, instrument, warn};

use super::{client::BaasClient, error::BackendFailure};

/// Storage-API implementation of the ObjectStore port
///
/// Uploads are authorized with the caller's access token when one is set:
/// the storage service stamps the object owner from that token, which is
/// where the foreign key to `users` comes into play. Without a token the
/// service key is used.
///
/// Foreign-key rejections are reported as
/// `ObjectStoreError::ConstraintViolation`; every other failure is
/// `ObjectStoreError::Other`.
#[derive(Clone)]
pub struct BaasObjectStore {
    client: BaasClient,
    access_token: Option<String>,
}

impl BaasObjectStore {
    /// Create a store authorized with the service key
    pub fn new(client: BaasClient) -> Self {
        Self {
            client,
            access_token: None,
        }
    }

    /// A copy of this store that uploads as the owner of `access_token`
    pub fn with_access_token(&self, access_token: Option<String>) -> Self {
        Self {
            client: self.client.clone(),
            access_token: access_token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Public URL of an object
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        self.client.url(&format!(
            "/storage/v1/object/public/{}",
            encoded_object_path(bucket, path)
        ))
    }
}

/// `{bucket}/{path}` with every segment percent-encoded
///
/// Keeps `#`, `?` and `%` in a key from truncating or rewriting the URL.
fn encoded_object_path(bucket: &str, path: &str) -> String {
    std::iter::once(bucket)
        .chain(path.split('/'))
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl ObjectStore for BaasObjectStore {
    #[instrument(skip(self, data), fields(data_size = data.len()))]
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> impl std::future::Future<Output = Result<StoredObject, ObjectStoreError>> + Send {
        let client = self.client.clone();
        let access_token = self.access_token.clone();
        let object_path = format!("/storage/v1/object/{}", encoded_object_path(bucket, path));
        let url = self.public_url(bucket, path);
        let key = path.to_string();
        let content_type = content_type
            .unwrap_or("application/octet-stream")
            .to_string();

        async move {
            debug!(key = %key, "Uploading object to storage API");

            let request = client
                .post(&object_path)
                .header("x-upsert", "false")
                .header("content-type", content_type)
                .body(data);
            let request = match &access_token {
                Some(token) => request.bearer_auth(token),
                None => client.as_service(request),
            };

            let response = request.send().await.map_err(|err| {
                error!(key = %key, error = %err, "Storage API request failed");
                ObjectStoreError::other(format!("storage request failed for '{}': {}", key, err))
            })?;

            if response.status().is_success() {
                info!(key = %key, "Successfully uploaded object");
                return Ok(StoredObject { url, key });
            }

            let failure = BackendFailure::from_response(response).await;
            if failure.is_foreign_key_violation() {
                warn!(key = %key, error = %failure, "Upload rejected by owner constraint");
                Err(ObjectStoreError::constraint_violation(failure.message))
            } else {
                error!(key = %key, error = %failure, "Upload rejected");
                Err(ObjectStoreError::other(failure.to_string()))
            }
        }
    }
}
