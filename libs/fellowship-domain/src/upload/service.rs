//! Upload coordinator - Business logic orchestration
//!
//! The storage layer keeps a foreign key from every stored object to the
//! `users` relation, while the identity provider creates users in a separate
//! store. A freshly signed-up user can therefore be rejected by the storage
//! layer until their `users` row exists and has propagated. The coordinator
//! masks that lag: it makes sure the row exists, waits for it to settle, and
//! retries uploads that fail with a constraint violation, writing each retry
//! to a fresh path. Every other failure is surfaced immediately.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{Result, UploadError, UploadRequest, UploadResult};
use crate::identity::{Principal, UserId, UserRecord};
use crate::ports::{
    ObjectStore, ObjectStoreError, SessionError, SessionProvider, StoreError, UserDirectory,
};

/// How the coordinator waits for a confirmed user record to propagate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleStrategy {
    /// Sleep `UploadConfig::record_settle` once the record is confirmed
    FixedDelay,

    /// Read the record back until it is visible, at most `max_polls` times
    /// with `interval` between reads, then proceed either way
    PollUntilVisible { interval: Duration, max_polls: u32 },
}

/// Configuration for the upload coordinator
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Total upload attempts, including the first (default: 5)
    pub max_attempts: u32,
    /// Wait after the user record is confirmed (default: 500ms)
    pub record_settle: Duration,
    /// Wait before the first upload attempt (default: 1s)
    pub upload_settle: Duration,
    /// Linear backoff unit; retry `n` waits `n * backoff_step` (default: 1s)
    pub backoff_step: Duration,
    /// Maximum file size in bytes (default: 50MB)
    pub max_file_size: usize,
    /// How to wait for the user record (default: fixed delay)
    pub settle_strategy: SettleStrategy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            record_settle: Duration::from_millis(500),
            upload_settle: Duration::from_millis(1000),
            backoff_step: Duration::from_millis(1000),
            max_file_size: 50 * 1024 * 1024, // 50MB
            settle_strategy: SettleStrategy::FixedDelay,
        }
    }
}

impl UploadConfig {
    /// Total time a fully exhausted upload spends waiting, excluding I/O
    ///
    /// With the defaults this is 11.5s (0.5s + 1s + 1s + 2s + 3s + 4s).
    /// Callers should set their own timeouts above this plus the latency of
    /// `max_attempts` uploads and upserts.
    pub fn worst_case_wait(&self) -> Duration {
        let record_wait = match &self.settle_strategy {
            SettleStrategy::FixedDelay => self.record_settle,
            SettleStrategy::PollUntilVisible {
                interval,
                max_polls,
            } => interval.saturating_mul(max_polls.saturating_sub(1)),
        };
        let attempts = u64::from(self.max_attempts.max(1));
        let backoff_units = (attempts - 1) * attempts / 2;

        record_wait
            .saturating_add(self.upload_settle)
            .saturating_add(scaled(self.backoff_step, backoff_units))
    }
}

/// `step * factor`, saturating at `Duration::MAX`
fn scaled(step: Duration, factor: u64) -> Duration {
    match u32::try_from(factor) {
        Ok(factor) => step.saturating_mul(factor),
        Err(_) if step.is_zero() => Duration::ZERO,
        Err(_) => Duration::MAX,
    }
}

/// Uploads files on behalf of a user, retrying through `users` replication lag
///
/// ## Static Dispatch
///
/// The coordinator is generic over its three collaborators. They are passed
/// in explicitly, and are expected to be cheap handles (the adapters wrap
/// pooled HTTP clients), so a coordinator can be built per request.
///
/// ## Waiting
///
/// All waits are awaited on the calling task. A call returns only after a
/// success, a permanent failure, exhaustion or cancellation; see
/// `UploadConfig::worst_case_wait` for the bound.
pub struct UploadCoordinator<S, D, O> {
    sessions: S,
    directory: D,
    store: O,
    config: UploadConfig,
    cancellation: Option<CancellationToken>,
}

impl<S, D, O> UploadCoordinator<S, D, O>
where
    S: SessionProvider,
    D: UserDirectory,
    O: ObjectStore,
{
    /// Create a coordinator with the given collaborators and configuration
    pub fn new(sessions: S, directory: D, store: O, config: UploadConfig) -> Self {
        Self {
            sessions,
            directory,
            store,
            config,
            cancellation: None,
        }
    }

    /// Create a coordinator with default configuration
    pub fn with_defaults(sessions: S, directory: D, store: O) -> Self {
        Self::new(sessions, directory, store, UploadConfig::default())
    }

    /// Stop waiting and retrying once `token` is cancelled
    ///
    /// The token is checked before every wait and every upload attempt.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Get the coordinator configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Make sure a `users` row exists for `principal`
    ///
    /// Upserts the record on `id`. If the upsert fails, looks the record up
    /// and inserts it when absent; an insert rejected as a duplicate means a
    /// concurrent caller created it, which counts as success. Once the record
    /// is confirmed, waits according to the settle strategy.
    ///
    /// # Errors
    ///
    /// - `UploadError::Authentication` if the principal has no id
    /// - `UploadError::IdentitySync` if both the upsert and the insert fail
    /// - `UploadError::Cancelled` if cancelled while settling
    #[instrument(skip_all, fields(owner_id = %principal.id))]
    pub async fn ensure_principal_record(&self, principal: &Principal) -> Result<()> {
        if principal.id.is_blank() {
            return Err(UploadError::authentication("principal has no id"));
        }

        let record = UserRecord::from_principal(principal);

        match self.directory.upsert(&record).await {
            Ok(_) => debug!("User record upserted"),
            Err(upsert_err) => {
                warn!(error = %upsert_err, "User record upsert failed, falling back to insert");
                self.insert_if_absent(&record, upsert_err).await?;
            }
        }

        self.settle_record(&record.id).await
    }

    async fn insert_if_absent(
        &self,
        record: &UserRecord,
        upsert_err: StoreError,
    ) -> Result<()> {
        match self.directory.find_by_id(&record.id).await {
            Ok(Some(_)) => {
                debug!("User record already present");
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "User record lookup failed, attempting insert"),
        }

        match self.directory.insert(record).await {
            Ok(_) => {
                info!("User record inserted");
                Ok(())
            }
            Err(err) if err.is_duplicate() => {
                debug!("User record created by a concurrent writer");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Could not create user record");
                Err(UploadError::identity_sync(
                    upsert_err.to_string(),
                    err.to_string(),
                ))
            }
        }
    }

    async fn settle_record(&self, id: &UserId) -> Result<()> {
        match &self.config.settle_strategy {
            SettleStrategy::FixedDelay => self.pause(self.config.record_settle).await,
            SettleStrategy::PollUntilVisible {
                interval,
                max_polls,
            } => {
                for poll in 1..=*max_polls {
                    self.check_cancelled()?;
                    match self.directory.find_by_id(id).await {
                        Ok(Some(_)) => {
                            debug!(poll, "User record visible");
                            return Ok(());
                        }
                        Ok(None) => debug!(poll, "User record not visible yet"),
                        Err(err) => warn!(poll, error = %err, "User record poll failed"),
                    }
                    if poll < *max_polls {
                        self.pause(*interval).await?;
                    }
                }
                warn!(
                    max_polls = *max_polls,
                    "User record not visible after polling, proceeding"
                );
                Ok(())
            }
        }
    }

    /// Upload a file on behalf of `principal`
    ///
    /// This is the main entry point. It:
    /// 1. Verifies the current session; the session's principal id is the
    ///    owner, whatever id the caller passed
    /// 2. Validates the file
    /// 3. Ensures the owner's `users` row exists
    /// 4. Waits for the upload settle interval
    /// 5. Uploads, retrying constraint violations with linear backoff and a
    ///    fresh path on every retry
    ///
    /// # Errors
    ///
    /// - `UploadError::Authentication` if there is no valid session; no store
    ///   is called in that case
    /// - `UploadError::InvalidFile` / `UploadError::FileTooLarge` for
    ///   unacceptable files
    /// - `UploadError::IdentitySync` if the owner row cannot be created
    /// - `UploadError::Storage` on the first non-constraint storage failure
    /// - `UploadError::Exhausted` if every attempt hit a constraint violation
    /// - `UploadError::Cancelled` if cancelled
    #[instrument(
        skip_all,
        fields(bucket = %request.bucket, path = %request.path, size = request.size())
    )]
    pub async fn upload_with_retry(
        &self,
        principal: &Principal,
        request: UploadRequest,
    ) -> Result<UploadResult> {
        self.check_cancelled()?;

        let owner = self.authenticate(principal).await?;
        self.validate(&request)?;

        self.ensure_principal_record(&owner).await?;
        self.pause(self.config.upload_settle).await?;

        let record = UserRecord::from_principal(&owner);
        let max_attempts = self.config.max_attempts.max(1);
        let mut path = request.path.clone();
        let mut attempt: u32 = 1;

        loop {
            self.check_cancelled()?;
            debug!(attempt, path = %path, "Uploading object");

            let outcome = self
                .store
                .upload(
                    &request.bucket,
                    path.as_str(),
                    request.data.clone(),
                    request.content_type.as_deref(),
                )
                .await;

            match outcome {
                Ok(stored) => {
                    info!(attempt, key = %stored.key, owner_id = %owner.id, "Upload succeeded");
                    return Ok(UploadResult {
                        url: stored.url,
                        key: stored.key,
                        path: path.to_string(),
                        attempts: attempt,
                    });
                }
                Err(ObjectStoreError::ConstraintViolation(msg)) => {
                    if attempt >= max_attempts {
                        error!(attempts = attempt, error = %msg, "Upload retries exhausted");
                        return Err(UploadError::exhausted(attempt, msg));
                    }

                    warn!(attempt, error = %msg, "Upload hit a constraint violation, retrying");

                    if let Err(err) = self.directory.upsert(&record).await {
                        warn!(attempt, error = %err, "Best-effort user record upsert failed");
                    }

                    self.pause(self.config.backoff_step.saturating_mul(attempt))
                        .await?;

                    path = request.path.mutated();
                    attempt += 1;
                    info!(attempt, path = %path, "Retrying upload at a fresh path");
                }
                Err(ObjectStoreError::Other(msg)) => {
                    error!(attempt, error = %msg, "Upload failed");
                    return Err(UploadError::storage(msg));
                }
            }
        }
    }

    async fn authenticate(&self, principal: &Principal) -> Result<Principal> {
        let session = self
            .sessions
            .current_session()
            .await
            .map_err(|err| match err {
                SessionError::Unauthenticated(msg) => UploadError::authentication(msg),
                SessionError::Backend(msg) => {
                    UploadError::authentication(format!("session could not be verified: {}", msg))
                }
            })?;

        if !session.is_valid {
            return Err(UploadError::authentication("session is no longer valid"));
        }
        if session.principal.id.is_blank() {
            return Err(UploadError::authentication("session has no principal id"));
        }
        if session.principal.id != principal.id {
            warn!(
                caller_id = %principal.id,
                session_id = %session.principal.id,
                "Caller id differs from session, uploading as the session principal"
            );
        }

        Ok(principal.resolve_against(&session.principal))
    }

    fn validate(&self, request: &UploadRequest) -> Result<()> {
        if request.data.is_empty() {
            return Err(UploadError::invalid_file("file is empty"));
        }
        if request.size() > self.config.max_file_size {
            return Err(UploadError::file_too_large(
                request.size(),
                self.config.max_file_size,
            ));
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(UploadError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(UploadError::Cancelled),
                    _ = tokio::time::sleep(duration) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Session;
    use crate::ports::StoredObject;
    use crate::upload::StoragePath;
    use bytes::Bytes;
    use std::collections::{HashMap, VecDeque};
    use std::future::{ready, Future};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const FK_MESSAGE: &str =
        "insert or update on table \"objects\" violates foreign key constraint \"objects_owner_fkey\"";

    struct FakeSessions {
        result: std::result::Result<Session, SessionError>,
        calls: AtomicUsize,
    }

    impl FakeSessions {
        fn signed_in(id: &str) -> Arc<Self> {
            Self::returning(Ok(Session::valid(Principal::new(id))))
        }

        fn returning(result: std::result::Result<Session, SessionError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl SessionProvider for FakeSessions {
        fn current_session(
            &self,
        ) -> impl Future<Output = std::result::Result<Session, SessionError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ready(self.result.clone())
        }
    }

    // In-memory users table. `lagging_reads` makes lookups miss every row,
    // like a replica that has not caught up yet.
    #[derive(Default)]
    struct FakeDirectory {
        rows: Mutex<HashMap<UserId, UserRecord>>,
        upserted: Mutex<Vec<UserRecord>>,
        fail_upsert: bool,
        insert_error: Option<StoreError>,
        lagging_reads: bool,
        hidden_reads: AtomicUsize,
        find_calls: AtomicUsize,
        insert_calls: AtomicUsize,
    }

    impl FakeDirectory {
        fn upsert_count(&self) -> usize {
            self.upserted.lock().unwrap().len()
        }

        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    impl UserDirectory for FakeDirectory {
        fn upsert(
            &self,
            record: &UserRecord,
        ) -> impl Future<Output = std::result::Result<UserRecord, StoreError>> + Send {
            self.upserted.lock().unwrap().push(record.clone());
            let result = if self.fail_upsert {
                Err(StoreError::backend("connection reset"))
            } else {
                self.rows
                    .lock()
                    .unwrap()
                    .insert(record.id.clone(), record.clone());
                Ok(record.clone())
            };
            ready(result)
        }

        fn find_by_id(
            &self,
            id: &UserId,
        ) -> impl Future<Output = std::result::Result<Option<UserRecord>, StoreError>> + Send
        {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            let hidden = self.lagging_reads
                || self
                    .hidden_reads
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            let found = if hidden {
                None
            } else {
                self.rows.lock().unwrap().get(id).cloned()
            };
            ready(Ok(found))
        }

        fn insert(
            &self,
            record: &UserRecord,
        ) -> impl Future<Output = std::result::Result<UserRecord, StoreError>> + Send {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            let result = if let Some(err) = &self.insert_error {
                Err(err.clone())
            } else {
                let mut rows = self.rows.lock().unwrap();
                if rows.contains_key(&record.id) {
                    Err(StoreError::duplicate("duplicate key value violates \"users_pkey\""))
                } else {
                    rows.insert(record.id.clone(), record.clone());
                    Ok(record.clone())
                }
            };
            ready(result)
        }
    }

    // Object store that replays a scripted list of failures, then succeeds.
    #[derive(Default)]
    struct FakeStore {
        script: Mutex<VecDeque<ObjectStoreError>>,
        paths: Mutex<Vec<String>>,
        cancel_on_upload: Option<CancellationToken>,
    }

    impl FakeStore {
        fn failing_with(failures: Vec<ObjectStoreError>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(failures.into()),
                ..Self::default()
            })
        }

        fn paths(&self) -> Vec<String> {
            self.paths.lock().unwrap().clone()
        }
    }

    impl ObjectStore for FakeStore {
        fn upload(
            &self,
            bucket: &str,
            path: &str,
            _data: Bytes,
            _content_type: Option<&str>,
        ) -> impl Future<Output = std::result::Result<StoredObject, ObjectStoreError>> + Send
        {
            self.paths.lock().unwrap().push(path.to_string());
            if let Some(token) = &self.cancel_on_upload {
                token.cancel();
            }
            let result = match self.script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(StoredObject {
                    url: format!("https://files.example.org/{}/{}", bucket, path),
                    key: path.to_string(),
                }),
            };
            ready(result)
        }
    }

    fn fk_failures(count: usize) -> Vec<ObjectStoreError> {
        (0..count)
            .map(|_| ObjectStoreError::constraint_violation(FK_MESSAGE))
            .collect()
    }

    fn request() -> UploadRequest {
        UploadRequest::new(
            "gallery",
            StoragePath::parse("events/u1/picnic.jpg").unwrap(),
            Bytes::from_static(b"\xff\xd8\xff\xe0jpeg"),
        )
        .with_content_type("image/jpeg")
    }

    type Coordinator = UploadCoordinator<Arc<FakeSessions>, Arc<FakeDirectory>, Arc<FakeStore>>;

    fn coordinator(
        sessions: &Arc<FakeSessions>,
        directory: &Arc<FakeDirectory>,
        store: &Arc<FakeStore>,
    ) -> Coordinator {
        UploadCoordinator::with_defaults(sessions.clone(), directory.clone(), store.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_succeeds_on_first_attempt() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let result = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap();

        assert_eq!(result.path, "events/u1/picnic.jpg");
        assert_eq!(result.key, "events/u1/picnic.jpg");
        assert_eq!(result.attempts, 1);
        assert_eq!(directory.upsert_count(), 1);
        assert_eq!(directory.row_count(), 1);
        assert_eq!(store.paths().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_before_first_attempt() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let started = Instant::now();
        service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_session_fails_before_store_calls() {
        let sessions = FakeSessions::returning(Err(SessionError::unauthenticated("no session")));
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Authentication(_)));
        assert_eq!(directory.upsert_count(), 0);
        assert_eq!(directory.find_calls.load(Ordering::SeqCst), 0);
        assert!(store.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_session_is_rejected() {
        let sessions =
            FakeSessions::returning(Ok(Session::invalid(Principal::new("u1"))));
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Authentication(_)));
        assert!(store.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_outage_is_an_authentication_error() {
        let sessions = FakeSessions::returning(Err(SessionError::backend("503")));
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Authentication(msg) if msg.contains("503")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_id_overrides_caller_id() {
        let sessions = FakeSessions::signed_in("session-user");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let caller = Principal::new("someone-else").with_display_name("Phoebe");
        service.upload_with_retry(&caller, request()).await.unwrap();

        let upserted = directory.upserted.lock().unwrap().clone();
        assert_eq!(upserted.len(), 1);
        assert_eq!(upserted[0].id.as_str(), "session-user");
        assert_eq!(upserted[0].name.as_deref(), Some("Phoebe"));
        assert!(directory
            .rows
            .lock()
            .unwrap()
            .contains_key(&UserId::new("session-user")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_constraint_error_is_not_retried() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = FakeStore::failing_with(vec![
            ObjectStoreError::other("Bucket not found"),
            ObjectStoreError::other("Bucket not found"),
        ]);
        let service = coordinator(&sessions, &directory, &store);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert_eq!(err, UploadError::storage("Bucket not found"));
        assert_eq!(store.paths().len(), 1);
        assert_eq!(directory.upsert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constraint_errors_retry_until_success_on_last_attempt() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = FakeStore::failing_with(fk_failures(4));
        let service = coordinator(&sessions, &directory, &store);

        let result = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap();

        let paths = store.paths();
        assert_eq!(paths.len(), 5);
        assert_eq!(result.attempts, 5);
        assert_eq!(paths[0], "events/u1/picnic.jpg");
        assert_ne!(paths[4], paths[0]);
        assert_eq!(result.path, paths[4]);
        // initial upsert plus one best-effort upsert per retry
        assert_eq!(directory.upsert_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retry_upsert_does_not_stop_retries() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory {
            fail_upsert: true,
            ..FakeDirectory::default()
        });
        directory.rows.lock().unwrap().insert(
            UserId::new("u1"),
            UserRecord::from_principal(&Principal::new("u1")),
        );
        let store = FakeStore::failing_with(fk_failures(2));
        let service = coordinator(&sessions, &directory, &store);

        let result = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(store.paths().len(), 3);
        // initial upsert plus one per retry, all of them failing
        assert_eq!(directory.upsert_count(), 3);
        assert_eq!(directory.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constraint_errors_exhaust_after_five_attempts() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = FakeStore::failing_with(fk_failures(5));
        let service = coordinator(&sessions, &directory, &store);

        let started = Instant::now();
        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Exhausted { attempts: 5, .. }));
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains("objects_owner_fkey"));
        assert_eq!(store.paths().len(), 5);
        let elapsed = started.elapsed();
        let bound = service.config().worst_case_wait();
        assert!(elapsed >= bound && elapsed < bound + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_constraint_errors_mutate_paths_with_linear_backoff() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = FakeStore::failing_with(fk_failures(3));
        let service = coordinator(&sessions, &directory, &store);

        let started = Instant::now();
        let result = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        let paths = store.paths();
        assert_eq!(paths.len(), 4);
        assert_ne!(result.path, "events/u1/picnic.jpg");
        for retried in &paths[1..] {
            assert_ne!(retried, &paths[0]);
            assert!(retried.starts_with("events/u1/"));
            assert!(retried.ends_with("-picnic.jpg"));
        }
        assert!(elapsed >= Duration::from_secs(1 + 2 + 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_file_is_rejected_before_store_calls() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let empty = UploadRequest::new(
            "gallery",
            StoragePath::parse("events/u1/empty.jpg").unwrap(),
            Bytes::new(),
        );
        let err = service
            .upload_with_retry(&Principal::new("u1"), empty)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::InvalidFile(_)));
        assert_eq!(directory.upsert_count(), 0);
        assert!(store.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_file_is_rejected() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let config = UploadConfig {
            max_file_size: 4,
            ..UploadConfig::default()
        };
        let service =
            UploadCoordinator::new(sessions.clone(), directory.clone(), store.clone(), config);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::FileTooLarge { max: 4, .. }));
        assert!(store.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_creates_exactly_one_record() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);
        let principal = Principal::new("u1").with_email("timothy@example.org");

        service.ensure_principal_record(&principal).await.unwrap();
        service.ensure_principal_record(&principal).await.unwrap();

        assert_eq!(directory.row_count(), 1);
        let rows = directory.rows.lock().unwrap();
        let row = rows.get(&UserId::new("u1")).unwrap();
        assert_eq!(row.nickname.as_deref(), Some("timothy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_falls_back_to_lookup_when_upsert_fails() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory {
            fail_upsert: true,
            ..FakeDirectory::default()
        });
        directory.rows.lock().unwrap().insert(
            UserId::new("u1"),
            UserRecord::from_principal(&Principal::new("u1")),
        );
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        service
            .ensure_principal_record(&Principal::new("u1"))
            .await
            .unwrap();

        assert_eq!(directory.find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(directory.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ensure_treats_duplicate_insert_as_success() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory {
            fail_upsert: true,
            lagging_reads: true,
            ..FakeDirectory::default()
        });
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);
        let principal = Principal::new("u1");

        let (first, second) = tokio::join!(
            service.ensure_principal_record(&principal),
            service.ensure_principal_record(&principal),
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(directory.insert_calls.load(Ordering::SeqCst), 2);
        assert_eq!(directory.row_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_reports_identity_sync_error() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory {
            fail_upsert: true,
            insert_error: Some(StoreError::backend("permission denied for table users")),
            ..FakeDirectory::default()
        });
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        match err {
            UploadError::IdentitySync { upsert, insert } => {
                assert!(upsert.contains("connection reset"));
                assert!(insert.contains("permission denied"));
            }
            other => panic!("expected IdentitySync, got {:?}", other),
        }
        assert!(store.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_principal_id_is_rejected() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let service = coordinator(&sessions, &directory, &store);

        let err = service
            .ensure_principal_record(&Principal::new(" "))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Authentication(_)));
        assert_eq!(directory.upsert_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_strategy_stops_once_record_is_visible() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory {
            hidden_reads: AtomicUsize::new(2),
            ..FakeDirectory::default()
        });
        let store = Arc::new(FakeStore::default());
        let config = UploadConfig {
            settle_strategy: SettleStrategy::PollUntilVisible {
                interval: Duration::from_millis(200),
                max_polls: 10,
            },
            ..UploadConfig::default()
        };
        let service =
            UploadCoordinator::new(sessions.clone(), directory.clone(), store.clone(), config);

        let started = Instant::now();
        service
            .ensure_principal_record(&Principal::new("u1"))
            .await
            .unwrap();

        assert_eq!(directory.find_calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(410));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_strategy_proceeds_when_record_never_appears() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory {
            lagging_reads: true,
            ..FakeDirectory::default()
        });
        let store = Arc::new(FakeStore::default());
        let config = UploadConfig {
            settle_strategy: SettleStrategy::PollUntilVisible {
                interval: Duration::from_millis(100),
                max_polls: 3,
            },
            ..UploadConfig::default()
        };
        let service =
            UploadCoordinator::new(sessions.clone(), directory.clone(), store.clone(), config);

        let result = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap();

        assert_eq!(result.attempts, 1);
        assert_eq!(directory.find_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::default());
        let token = CancellationToken::new();
        token.cancel();
        let service = coordinator(&sessions, &directory, &store).with_cancellation(token);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert_eq!(err, UploadError::Cancelled);
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retry_loop() {
        let token = CancellationToken::new();
        let sessions = FakeSessions::signed_in("u1");
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore {
            script: Mutex::new(fk_failures(5).into()),
            cancel_on_upload: Some(token.clone()),
            ..FakeStore::default()
        });
        let service = coordinator(&sessions, &directory, &store).with_cancellation(token);

        let err = service
            .upload_with_retry(&Principal::new("u1"), request())
            .await
            .unwrap_err();

        assert_eq!(err, UploadError::Cancelled);
        assert_eq!(store.paths().len(), 1);
    }

    #[test]
    fn test_default_worst_case_wait() {
        assert_eq!(
            UploadConfig::default().worst_case_wait(),
            Duration::from_millis(11_500)
        );
    }

    #[test]
    fn test_worst_case_wait_with_polling() {
        let config = UploadConfig {
            max_attempts: 2,
            settle_strategy: SettleStrategy::PollUntilVisible {
                interval: Duration::from_millis(250),
                max_polls: 5,
            },
            ..UploadConfig::default()
        };
        assert_eq!(config.worst_case_wait(), Duration::from_millis(3000));
    }

    #[test]
    fn test_worst_case_wait_saturates_instead_of_overflowing() {
        let config = UploadConfig {
            max_attempts: 100_000,
            ..UploadConfig::default()
        };
        assert_eq!(config.worst_case_wait(), Duration::MAX);

        let config = UploadConfig {
            max_attempts: 3,
            backoff_step: Duration::MAX,
            ..UploadConfig::default()
        };
        assert_eq!(config.worst_case_wait(), Duration::MAX);
    }

    #[test]
    fn test_worst_case_wait_ignores_attempts_without_backoff() {
        let config = UploadConfig {
            max_attempts: u32::MAX,
            backoff_step: Duration::ZERO,
            ..UploadConfig::default()
        };
        assert_eq!(config.worst_case_wait(), Duration::from_millis(1500));
    }
}
