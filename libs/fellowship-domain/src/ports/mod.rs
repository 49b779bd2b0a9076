//! Ports (trait definitions) for external dependencies
//!
//! This module defines the contracts (ports) that external adapters must implement.
//! Following hexagonal architecture, the domain defines what it needs, and the
//! infrastructure provides implementations.
//!
//! ## Static Dispatch
//!
//! We use native Rust async traits with `impl Future` return types instead of
//! `async_trait` to ensure zero-cost abstractions and static dispatch.

mod error;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::identity::{Session, UserId, UserRecord};

pub use error::{ObjectStoreError, SessionError, StoreError};

/// Port for the identity/session provider
pub trait SessionProvider: Send + Sync {
    /// Return the session of the current caller
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Unauthenticated` when there is no session at all.
    /// A session the provider knows about but no longer honours may also be
    /// returned as `Ok` with `is_valid == false`.
    fn current_session(&self) -> impl Future<Output = Result<Session, SessionError>> + Send;
}

/// Port for the `users` relation the storage layer's foreign key points at
///
/// Implementations must map unique-key violations on `insert` to
/// `StoreError::Duplicate`; every other failure is `StoreError::Backend`.
pub trait UserDirectory: Send + Sync {
    /// Insert or update the record, using `id` as the conflict key
    fn upsert(
        &self,
        record: &UserRecord,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Look a record up by id
    fn find_by_id(
        &self,
        id: &UserId,
    ) -> impl Future<Output = Result<Option<UserRecord>, StoreError>> + Send;

    /// Plain insert, failing with `StoreError::Duplicate` if the id exists
    fn insert(
        &self,
        record: &UserRecord,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;
}

/// Location of an object after a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// URL the object can be fetched from
    pub url: String,

    /// Storage key of the object within its bucket
    pub key: String,
}

/// Port for object storage
pub trait ObjectStore: Send + Sync {
    /// Write `data` to `path` inside `bucket`
    ///
    /// # Errors
    ///
    /// - `ObjectStoreError::ConstraintViolation` if the write was rejected
    ///   because of a constraint on the owner reference
    /// - `ObjectStoreError::Other` for every other failure
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> impl Future<Output = Result<StoredObject, ObjectStoreError>> + Send;
}

impl<T: SessionProvider> SessionProvider for Arc<T> {
    fn current_session(&self) -> impl Future<Output = Result<Session, SessionError>> + Send {
        (**self).current_session()
    }
}

impl<T: UserDirectory> UserDirectory for Arc<T> {
    fn upsert(
        &self,
        record: &UserRecord,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send {
        (**self).upsert(record)
    }

    fn find_by_id(
        &self,
        id: &UserId,
    ) -> impl Future<Output = Result<Option<UserRecord>, StoreError>> + Send {
        (**self).find_by_id(id)
    }

    fn insert(
        &self,
        record: &UserRecord,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send {
        (**self).insert(record)
    }
}

impl<T: ObjectStore> ObjectStore for Arc<T> {
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> impl Future<Output = Result<StoredObject, ObjectStoreError>> + Send {
        (**self).upload(bucket, path, data, content_type)
    }
}
