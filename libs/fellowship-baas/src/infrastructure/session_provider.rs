//! Session provider backed by the BaaS auth API

use fellowship_domain::{
    identity::{Principal, Session},
    ports::{SessionError, SessionProvider},
};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{client::BaasClient, error::BackendFailure};

/// User as returned by `GET /auth/v1/user`
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Map<String, serde_json::Value>,
}

impl AuthUser {
    fn display_name(&self) -> Option<String> {
        ["full_name", "name", "display_name"]
            .iter()
            .filter_map(|key| self.user_metadata.get(*key))
            .filter_map(|value| value.as_str())
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(str::to_string)
    }

    fn into_principal(self) -> Principal {
        let display_name = self.display_name();
        Principal {
            id: self.id.into(),
            email: self.email.filter(|e| !e.trim().is_empty()),
            display_name,
        }
    }
}

/// Resolves the session of one caller from their access token
///
/// Built per request from the caller's bearer token. Without a token no
/// request is sent and the caller is reported as unauthenticated.
#[derive(Clone)]
pub struct BaasSessionProvider {
    client: BaasClient,
    access_token: Option<String>,
}

impl BaasSessionProvider {
    /// Create a provider for the given access token
    pub fn new(client: BaasClient, access_token: Option<String>) -> Self {
        Self {
            client,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Create a provider from an `Authorization` header value (`Bearer <token>`)
    pub fn from_authorization(client: BaasClient, header: Option<&str>) -> Self {
        Self::new(client, header.and_then(bearer_token))
    }

    /// The caller's access token, if any
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

/// Extract the token from a `Bearer <token>` header value
pub(crate) fn bearer_token(header: &str) -> Option<String> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl SessionProvider for BaasSessionProvider {
    #[instrument(skip(self))]
    fn current_session(
        &self,
    ) -> impl std::future::Future<Output = Result<Session, SessionError>> + Send {
        let client = self.client.clone();
        let access_token = self.access_token.clone();

        async move {
            let token = access_token
                .ok_or_else(|| SessionError::unauthenticated("no access token provided"))?;

            debug!("Resolving session from auth API");

            let response = client
                .get("/auth/v1/user")
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|err| {
                    warn!(error = %err, "Auth API request failed");
                    SessionError::backend(format!("auth request failed: {}", err))
                })?;

            if !response.status().is_success() {
                let failure = BackendFailure::from_response(response).await;
                if failure.is_unauthorized() {
                    debug!(error = %failure, "Access token rejected");
                    return Err(SessionError::unauthenticated(failure.message));
                }
                warn!(error = %failure, "Auth API returned an error");
                return Err(SessionError::backend(failure.to_string()));
            }

            let user: AuthUser = response.json().await.map_err(|err| {
                SessionError::backend(format!("invalid auth API response: {}", err))
            })?;

            debug!(user_id = %user.id, "Session resolved");
            Ok(Session::valid(user.into_principal()))
        }
    }
}
