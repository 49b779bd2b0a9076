//! # Fellowship BaaS Adapters
//!
//! Implementations of the domain ports against a Supabase-compatible
//! backend-as-a-service:
//!
//! - `BaasSessionProvider`: the auth API (`/auth/v1/user`)
//! - `BaasUserDirectory`: the `users` table through PostgREST (`/rest/v1`)
//! - `BaasObjectStore`: the storage API (`/storage/v1/object`)
//!
//! All three share one `BaasClient`, which wraps a pooled `reqwest::Client`
//! and is cheap to clone. Backend error payloads are classified here, at the
//! port boundary, into the domain's tagged error variants.

pub mod infrastructure;

pub use infrastructure::{
    BaasClient, BaasConfig, BaasError, BaasObjectStore, BaasSessionProvider, BaasUserDirectory,
};
