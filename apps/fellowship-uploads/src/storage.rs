//! Object store selected at startup

use bytes::Bytes;
use fellowship_baas::BaasObjectStore;
use fellowship_domain::ports::{ObjectStore, ObjectStoreError, StoredObject};
use fellowship_s3::S3ObjectStore;

/// The configured object store
#[derive(Clone)]
pub enum ObjectStoreBackend {
    Baas(BaasObjectStore),
    S3(S3ObjectStore),
}

impl ObjectStoreBackend {
    /// The store to use for a caller with the given access token
    ///
    /// The BaaS store uploads as the caller so the object owner is set; S3
    /// has no per-caller identity.
    pub fn for_caller(&self, access_token: Option<&str>) -> Self {
        match self {
            Self::Baas(store) => Self::Baas(store.with_access_token(access_token.map(str::to_string))),
            Self::S3(store) => Self::S3(store.clone()),
        }
    }

    /// Short backend name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Baas(_) => "baas",
            Self::S3(_) => "s3",
        }
    }
}

impl ObjectStore for ObjectStoreBackend {
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> impl std::future::Future<Output = Result<StoredObject, ObjectStoreError>> + Send {
        let backend = self.clone();
        let bucket = bucket.to_string();
        let path = path.to_string();
        let content_type = content_type.map(str::to_string);

        async move {
            match backend {
                Self::Baas(store) => {
                    store
                        .upload(&bucket, &path, data, content_type.as_deref())
                        .await
                }
                Self::S3(store) => {
                    store
                        .upload(&bucket, &path, data, content_type.as_deref())
                        .await
                }
            }
        }
    }
}
