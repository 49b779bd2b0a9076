//! # Fellowship Domain Layer
//!
//! This crate contains the upload logic shared by the Fellowship community
//! platform. It follows hexagonal architecture principles:
//!
//! - **Entities**: Principals, sessions, user records, storage paths
//! - **Ports**: Trait definitions for external dependencies
//!   (`SessionProvider`, `UserDirectory`, `ObjectStore`)
//! - **Services**: `UploadCoordinator`, which uploads a file on behalf of a
//!   user while masking replication lag between the identity store and the
//!   storage layer's foreign key on `users`
//!
//! ## Architecture
//!
//! This layer has NO dependencies on infrastructure concerns (HTTP, S3,
//! PostgREST, etc.). All external dependencies are expressed as traits
//! (ports) that are implemented by adapter crates.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use fellowship_domain::identity::Principal;
//! use fellowship_domain::ports::{ObjectStore, SessionProvider, UserDirectory};
//! use fellowship_domain::upload::{StoragePath, UploadCoordinator, UploadRequest};
//!
//! async fn example<S, D, O>(coordinator: UploadCoordinator<S, D, O>)
//! where
//!     S: SessionProvider,
//!     D: UserDirectory,
//!     O: ObjectStore,
//! {
//!     let principal = Principal::new("user-1");
//!     let path = StoragePath::parse("avatars/user-1/photo.jpg").unwrap();
//!     let request = UploadRequest::new("gallery", path, Bytes::from_static(b"jpeg"));
//!     let result = coordinator.upload_with_retry(&principal, request).await.unwrap();
//!     println!("Uploaded to {}", result.url);
//! }
//! ```

pub mod identity;
pub mod ports;
pub mod upload;

// Re-export commonly used types
pub use identity::{Principal, Session, UserId, UserRecord};
pub use ports::{ObjectStore, SessionProvider, UserDirectory};
pub use upload::{
    StoragePath, UploadConfig, UploadCoordinator, UploadError, UploadRequest, UploadResult,
};
