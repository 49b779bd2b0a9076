//! Identity entities
//!
//! The identity provider owns principals and sessions; the domain only reads
//! them. `UserRecord` is the local mirror row in the `users` relation that
//! stored objects reference through a foreign key.

use serde::{Deserialize, Serialize};

use crate::identity::ids::UserId;

/// The actor performing an upload
///
/// # Example
///
/// ```rust
/// use fellowship_domain::identity::Principal;
///
/// let principal = Principal::new("user-1")
///     .with_email("ruth@example.org")
///     .with_display_name("Ruth");
/// assert_eq!(principal.id.as_str(), "user-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identity-provider id of the user
    pub id: UserId,

    /// Email address, when the provider exposes one
    pub email: Option<String>,

    /// Human-readable name, when known
    pub display_name: Option<String>,
}

impl Principal {
    /// Create a principal with only an id
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
        }
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the display name
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Resolve the principal an upload is performed as
    ///
    /// The session is authoritative for the id. Display fields supplied by
    /// the caller win; missing ones are taken from the session.
    pub fn resolve_against(&self, authoritative: &Principal) -> Principal {
        Principal {
            id: authoritative.id.clone(),
            email: self.email.clone().or_else(|| authoritative.email.clone()),
            display_name: self
                .display_name
                .clone()
                .or_else(|| authoritative.display_name.clone()),
        }
    }
}

/// A session as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The authenticated principal
    pub principal: Principal,

    /// False once the provider considers the session expired or revoked
    pub is_valid: bool,
}

impl Session {
    /// A currently valid session for `principal`
    pub fn valid(principal: Principal) -> Self {
        Self {
            principal,
            is_valid: true,
        }
    }

    /// A session the provider no longer honours
    pub fn invalid(principal: Principal) -> Self {
        Self {
            principal,
            is_valid: false,
        }
    }
}

/// Local mirror of a user in the `users` relation
///
/// Optional fields that are `None` are omitted when serialized, so an upsert
/// never overwrites a stored value with null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Same value as the principal id
    pub id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserRecord {
    /// Derive the record that mirrors `principal`
    ///
    /// The nickname falls back to the local part of the email address when
    /// no display name is known.
    pub fn from_principal(principal: &Principal) -> Self {
        let nickname = principal.display_name.clone().or_else(|| {
            principal
                .email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        });

        Self {
            id: principal.id.clone(),
            email: principal.email.clone(),
            nickname,
            name: principal.display_name.clone(),
        }
    }
}
