//! BaaS infrastructure adapters

mod client;
mod error;
mod object_store;
mod session_provider;
mod user_directory;

pub use client::{BaasClient, BaasConfig};
pub use error::BaasError;
pub use object_store::BaasObjectStore;
pub use session_provider::BaasSessionProvider;
pub use user_directory::BaasUserDirectory;
