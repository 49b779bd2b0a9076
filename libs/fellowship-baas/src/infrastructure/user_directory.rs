//! `users` table access through PostgREST

use fellowship_domain::{
    identity::{UserId, UserRecord},
    ports::{StoreError, UserDirectory},
};
use reqwest::Response;
use tracing::{debug, error, instrument, warn};

use super::{client::BaasClient, error::BackendFailure};

/// PostgREST-backed implementation of the UserDirectory port
///
/// Requests are authorized with the service key, so row-level security on
/// `users` does not hide rows written by other sessions.
#[derive(Clone)]
pub struct BaasUserDirectory {
    client: BaasClient,
}

impl BaasUserDirectory {
    /// Create a directory over the client's users table
    pub fn new(client: BaasClient) -> Self {
        Self { client }
    }

    fn table_path(&self) -> String {
        format!("/rest/v1/{}", self.client.users_table())
    }
}

/// Read the single row PostgREST returns with `return=representation`
async fn returned_row(response: Response, sent: &UserRecord) -> Result<UserRecord, StoreError> {
    let rows: Vec<UserRecord> = response
        .json()
        .await
        .map_err(|err| StoreError::backend(format!("invalid PostgREST response: {}", err)))?;
    Ok(rows.into_iter().next().unwrap_or_else(|| sent.clone()))
}

impl UserDirectory for BaasUserDirectory {
    #[instrument(skip(self, record), fields(user_id = %record.id))]
    fn upsert(
        &self,
        record: &UserRecord,
    ) -> impl std::future::Future<Output = Result<UserRecord, StoreError>> + Send {
        let client = self.client.clone();
        let path = self.table_path();
        let record = record.clone();

        async move {
            debug!("Upserting user record");

            let response = client
                .as_service(client.post(&path))
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates,return=representation")
                .json(&record)
                .send()
                .await
                .map_err(|err| StoreError::backend(format!("upsert request failed: {}", err)))?;

            if !response.status().is_success() {
                let failure = BackendFailure::from_response(response).await;
                warn!(error = %failure, "User record upsert rejected");
                return Err(StoreError::backend(failure.to_string()));
            }

            returned_row(response, &record).await
        }
    }

    #[instrument(skip(self), fields(user_id = %id))]
    fn find_by_id(
        &self,
        id: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<UserRecord>, StoreError>> + Send {
        let client = self.client.clone();
        let path = self.table_path();
        let filter = format!("eq.{}", id);

        async move {
            debug!("Looking up user record");

            let response = client
                .as_service(client.get(&path))
                .query(&[("id", filter.as_str()), ("select", "*"), ("limit", "1")])
                .send()
                .await
                .map_err(|err| StoreError::backend(format!("select request failed: {}", err)))?;

            if !response.status().is_success() {
                let failure = BackendFailure::from_response(response).await;
                warn!(error = %failure, "User record lookup failed");
                return Err(StoreError::backend(failure.to_string()));
            }

            let rows: Vec<UserRecord> = response.json().await.map_err(|err| {
                StoreError::backend(format!("invalid PostgREST response: {}", err))
            })?;
            Ok(rows.into_iter().next())
        }
    }

    #[instrument(skip(self, record), fields(user_id = %record.id))]
    fn insert(
        &self,
        record: &UserRecord,
    ) -> impl std::future::Future<Output = Result<UserRecord, StoreError>> + Send {
        let client = self.client.clone();
        let path = self.table_path();
        let record = record.clone();

        async move {
            debug!("Inserting user record");

            let response = client
                .as_service(client.post(&path))
                .header("Prefer", "return=representation")
                .json(&record)
                .send()
                .await
                .map_err(|err| StoreError::backend(format!("insert request failed: {}", err)))?;

            if !response.status().is_success() {
                let failure = BackendFailure::from_response(response).await;
                if failure.is_unique_violation() {
                    debug!(error = %failure, "User record already exists");
                    return Err(StoreError::duplicate(failure.message));
                }
                error!(error = %failure, "User record insert failed");
                return Err(StoreError::backend(failure.to_string()));
            }

            returned_row(response, &record).await
        }
    }
}
